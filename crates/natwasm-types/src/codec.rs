//! Guest memory codec.
//!
//! A natural number lives in guest-addressable memory in one of two forms:
//!
//! ```text
//! linked limbs   head ──▶ [limb 0 | next] ──▶ [limb 1 | next] ──▶ … ──▶ [limb k | 0]
//! opaque handle  h  (an index into a host-managed arithmetic library)
//! ```
//!
//! Both forms are reached through a small capability trait: [`LimbChain`]
//! for linked limbs (store limb, load limb, chain to next) and
//! [`LimbAccumulator`] for handles (create, append limb, read back limbs).
//! The encode/decode functions here are written once against those traits,
//! so the host-side libraries and a guest library reached through its
//! exports share the same codec.

use std::collections::HashSet;
use std::fmt;

use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::value::{Natural, LIMB_BITS};
use crate::BridgeResult;

/// A guest-side address or handle. `0` is the null sentinel.
pub type Addr = u32;

/// "Absent / not yet allocated."
pub const NULL_ADDR: Addr = 0;

/// Which guest-side representation a module is compiled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    /// Singly linked list of fixed-size `(limb, next)` nodes.
    LinkedLimb,
    /// Integer handle into a host arithmetic library.
    #[default]
    OpaqueHandle,
}

impl Representation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinkedLimb => "linked_limb",
            Self::OpaqueHandle => "opaque_handle",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Representation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linked" | "linked_limb" | "linked-limb" => Ok(Self::LinkedLimb),
            "handle" | "opaque_handle" | "opaque-handle" | "gmp" => Ok(Self::OpaqueHandle),
            other => Err(format!("unknown representation `{other}`")),
        }
    }
}

/// Linked-limb capability: fixed-size nodes holding one limb and a
/// successor address.
pub trait LimbChain {
    /// Allocate a node holding `limb` with a null successor.
    fn create_chunk(&mut self, limb: u32) -> BridgeResult<Addr>;
    fn set_next(&mut self, node: Addr, next: Addr) -> BridgeResult<()>;
    fn get_value(&mut self, node: Addr) -> BridgeResult<u32>;
    fn get_next(&mut self, node: Addr) -> BridgeResult<Addr>;
}

/// Opaque-handle capability, shaped after a library that keeps a "current"
/// value for appends and a read cursor for extraction.
pub trait LimbAccumulator {
    /// Create a zero value and make it the append target.
    fn create(&mut self) -> BridgeResult<Addr>;
    /// Append the next more-significant limb to the append target.
    fn push_u32(&mut self, limb: u32) -> BridgeResult<()>;
    /// Select `handle` for reading and return its limb count.
    fn read(&mut self, handle: Addr) -> BridgeResult<u32>;
    /// Next limb of the selected value, least significant first.
    fn next_u32(&mut self) -> BridgeResult<u32>;
}

/// Encode and decode whole values in whichever representation is active.
pub trait ValueCodec {
    fn representation(&self) -> Representation;
    fn encode(&mut self, value: &Natural) -> BridgeResult<Addr>;
    fn decode(&mut self, addr: Addr) -> BridgeResult<Natural>;

    /// Whether `addr` plausibly refers to a value. Codecs that cannot tell
    /// answer `true` for every non-null address.
    fn is_live(&mut self, addr: Addr) -> bool {
        addr != NULL_ADDR
    }
}

/// Write `value` as a fresh chain and return its head.
///
/// Zero still allocates one node holding limb `0`.
pub fn encode_linked<C: LimbChain + ?Sized>(chain: &mut C, value: &Natural) -> BridgeResult<Addr> {
    if value.is_zero() {
        return chain.create_chunk(0);
    }

    let mut remaining = value.clone();
    let mut head = NULL_ADDR;
    let mut prev = NULL_ADDR;

    while !remaining.is_zero() {
        let limb = remaining.iter_u32_digits().next().unwrap_or(0);
        let node = chain.create_chunk(limb)?;
        if prev == NULL_ADDR {
            head = node;
        } else {
            chain.set_next(prev, node)?;
        }
        prev = node;
        remaining >>= LIMB_BITS;
    }

    Ok(head)
}

/// Read the chain starting at `head` back into a value.
///
/// Limbs are unsigned regardless of how the underlying read reports them.
/// A chain that revisits a node is rejected rather than followed forever.
pub fn decode_linked<C: LimbChain + ?Sized>(chain: &mut C, head: Addr) -> BridgeResult<Natural> {
    let mut result = Natural::zero();
    let mut shift = 0u64;
    let mut current = head;
    let mut visited = HashSet::new();

    while current != NULL_ADDR {
        if !visited.insert(current) {
            return Err(FormatError::CyclicChain {
                start: head,
                node: current,
            }
            .into());
        }
        let limb = chain.get_value(current)?;
        result += Natural::from(limb) << shift;
        shift += u64::from(LIMB_BITS);
        current = chain.get_next(current)?;
    }

    Ok(result)
}

/// Create a handle and push `value` into it limb by limb.
///
/// Zero is a handle with no pushed limbs.
pub fn encode_handle<A: LimbAccumulator + ?Sized>(acc: &mut A, value: &Natural) -> BridgeResult<Addr> {
    let handle = acc.create()?;
    for limb in value.to_u32_digits() {
        acc.push_u32(limb)?;
    }
    Ok(handle)
}

/// Pull every limb of `handle` back out of the library.
pub fn decode_handle<A: LimbAccumulator + ?Sized>(acc: &mut A, handle: Addr) -> BridgeResult<Natural> {
    let count = acc.read(handle)?;
    let mut result = Natural::zero();
    for i in 0..count {
        let limb = acc.next_u32()?;
        result += Natural::from(limb) << (u64::from(i) * u64::from(LIMB_BITS));
    }
    Ok(result)
}
