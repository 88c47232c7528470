//! Host-side linked-limb library.
//!
//! Nodes live in an arena of fixed-size slots addressed the way guest
//! linear memory is: by byte offset. Slot `i` sits at
//! `(i + 1) * NODE_SIZE`, so address `0` is never a node and can serve as
//! the null successor.
//!
//! ```text
//! offset+0 : u32  limb
//! offset+4 : u32  next node address (0 = end of chain)
//! ```

use crate::codec::{decode_linked, encode_linked, Addr, LimbChain, Representation, ValueCodec, NULL_ADDR};
use crate::error::FormatError;
use crate::surface::{ImportSurface, Operation};
use crate::value::{to_limbs, Natural};
use crate::BridgeResult;

/// Size of one node in bytes.
pub const NODE_SIZE: u32 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Node {
    limb: u32,
    next: Addr,
}

/// Arena of `(limb, next)` nodes.
#[derive(Debug, Default)]
pub struct LimbArena {
    nodes: Vec<Node>,
    trace: Vec<Natural>,
}

impl LimbArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes allocated so far. Nodes are never reclaimed while
    /// the arena lives; the whole arena is dropped with its invocation.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Allocate a zeroed node.
    pub fn allocate(&mut self) -> Addr {
        self.nodes.push(Node::default());
        self.nodes.len() as Addr * NODE_SIZE
    }

    pub fn set_value(&mut self, node: Addr, limb: u32) -> BridgeResult<()> {
        self.node_mut(node)?.limb = limb;
        Ok(())
    }

    fn slot(&self, addr: Addr) -> BridgeResult<usize> {
        if addr == NULL_ADDR {
            return Err(FormatError::NullAddress.into());
        }
        if addr % NODE_SIZE != 0 {
            return Err(FormatError::DanglingAddress(addr).into());
        }
        let index = (addr / NODE_SIZE) as usize - 1;
        if index >= self.nodes.len() {
            return Err(FormatError::DanglingAddress(addr).into());
        }
        Ok(index)
    }

    fn node(&self, addr: Addr) -> BridgeResult<&Node> {
        let index = self.slot(addr)?;
        Ok(&self.nodes[index])
    }

    fn node_mut(&mut self, addr: Addr) -> BridgeResult<&mut Node> {
        let index = self.slot(addr)?;
        Ok(&mut self.nodes[index])
    }
}

impl LimbChain for LimbArena {
    fn create_chunk(&mut self, limb: u32) -> BridgeResult<Addr> {
        let addr = self.allocate();
        self.set_value(addr, limb)?;
        Ok(addr)
    }

    fn set_next(&mut self, node: Addr, next: Addr) -> BridgeResult<()> {
        self.node_mut(node)?.next = next;
        Ok(())
    }

    fn get_value(&mut self, node: Addr) -> BridgeResult<u32> {
        Ok(self.node(node)?.limb)
    }

    fn get_next(&mut self, node: Addr) -> BridgeResult<Addr> {
        Ok(self.node(node)?.next)
    }
}

impl ValueCodec for LimbArena {
    fn representation(&self) -> Representation {
        Representation::LinkedLimb
    }

    fn encode(&mut self, value: &Natural) -> BridgeResult<Addr> {
        encode_linked(self, value)
    }

    fn decode(&mut self, addr: Addr) -> BridgeResult<Natural> {
        decode_linked(self, addr)
    }

    fn is_live(&mut self, addr: Addr) -> bool {
        self.slot(addr).is_ok()
    }
}

impl ImportSurface for LimbArena {
    fn operations(&self) -> Vec<Operation> {
        Operation::for_representation(Representation::LinkedLimb)
    }

    fn load(&mut self, addr: Addr) -> BridgeResult<Natural> {
        decode_linked(self, addr)
    }

    /// Rewrite the chain headed by `addr` in place: existing nodes are
    /// reused front to back, missing ones appended, and the chain is cut
    /// after the last significant limb.
    fn store(&mut self, addr: Addr, value: &Natural) -> BridgeResult<()> {
        let limbs = to_limbs(value);
        let mut node = addr;
        for (i, limb) in limbs.iter().enumerate() {
            self.set_value(node, *limb)?;
            if i + 1 == limbs.len() {
                break;
            }
            let mut next = self.get_next(node)?;
            if next == NULL_ADDR {
                next = self.create_chunk(0)?;
                self.set_next(node, next)?;
            }
            node = next;
        }
        self.set_next(node, NULL_ADDR)
    }

    fn new_zero(&mut self) -> BridgeResult<Addr> {
        self.create_chunk(0)
    }

    fn append_limb(&mut self, addr: Addr, limb: u32) -> BridgeResult<()> {
        let mut tail = addr;
        loop {
            let next = self.get_next(tail)?;
            if next == NULL_ADDR {
                break;
            }
            tail = next;
        }
        let node = self.create_chunk(limb)?;
        self.set_next(tail, node)
    }

    fn trace(&mut self) -> &mut Vec<Natural> {
        &mut self.trace
    }

    fn dispatch_native(&mut self, op: Operation, args: &[i32]) -> BridgeResult<Option<i32>> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);
        match op {
            Operation::Allocate => Ok(Some(self.allocate() as i32)),
            Operation::CreateChunk => self.create_chunk(arg(0) as u32).map(|a| Some(a as i32)),
            Operation::GetValue => self.get_value(arg(0) as Addr).map(|v| Some(v as i32)),
            Operation::SetValue => self.set_value(arg(0) as Addr, arg(1) as u32).map(|_| None),
            Operation::GetNext => self.get_next(arg(0) as Addr).map(|a| Some(a as i32)),
            Operation::SetNext => self.set_next(arg(0) as Addr, arg(1) as Addr).map(|_| None),
            other => Err(crate::LinkError::MissingOperation {
                operation: other.name().to_string(),
                provider: "linked-limb library".to_string(),
            }
            .into()),
        }
    }
}
