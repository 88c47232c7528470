//! Host-side opaque-handle library.
//!
//! Values are owned by the table and referenced by integer handle
//! (`index + 1`; `0` is null). Construction and extraction follow a
//! stateful protocol: `create` makes a value the append target and
//! `push_u32` appends limbs to it; `read` selects a value and reports its
//! limb count, then `next_u32` yields limbs least significant first.

use num_traits::Zero;

use crate::codec::{decode_handle, encode_handle, Addr, LimbAccumulator, Representation, ValueCodec, NULL_ADDR};
use crate::error::FormatError;
use crate::surface::{ImportSurface, Operation};
use crate::value::{significant_limbs, Natural, LIMB_BITS};
use crate::BridgeResult;

#[derive(Debug, Clone, Default)]
struct Entry {
    value: Natural,
    /// Limbs appended so far; the next push lands at this position.
    pushed: u32,
}

/// Handle table backed by `num-bigint`.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: Vec<Option<Entry>>,
    append_target: Option<Addr>,
    read_cursor: Option<(Addr, u32)>,
    trace: Vec<Natural>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently holding a value.
    pub fn live_handles(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Release a handle. Releasing null or an already released handle is a
    /// no-op, matching `free(NULL)`.
    pub fn free(&mut self, handle: Addr) {
        if handle == NULL_ADDR {
            return;
        }
        if let Some(slot) = self.entries.get_mut(handle as usize - 1) {
            *slot = None;
        }
        if self.append_target == Some(handle) {
            self.append_target = None;
        }
        if matches!(self.read_cursor, Some((h, _)) if h == handle) {
            self.read_cursor = None;
        }
    }

    fn entry(&self, handle: Addr) -> BridgeResult<&Entry> {
        if handle == NULL_ADDR {
            return Err(FormatError::NullAddress.into());
        }
        self.entries
            .get(handle as usize - 1)
            .and_then(Option::as_ref)
            .ok_or_else(|| FormatError::DanglingAddress(handle).into())
    }

    fn entry_mut(&mut self, handle: Addr) -> BridgeResult<&mut Entry> {
        if handle == NULL_ADDR {
            return Err(FormatError::NullAddress.into());
        }
        self.entries
            .get_mut(handle as usize - 1)
            .and_then(Option::as_mut)
            .ok_or_else(|| FormatError::DanglingAddress(handle).into())
    }
}

impl LimbAccumulator for HandleTable {
    fn create(&mut self) -> BridgeResult<Addr> {
        self.entries.push(Some(Entry::default()));
        let handle = self.entries.len() as Addr;
        self.append_target = Some(handle);
        Ok(handle)
    }

    /// Pushing with no append target is ignored, as the C library does.
    fn push_u32(&mut self, limb: u32) -> BridgeResult<()> {
        match self.append_target {
            Some(handle) => self.append_limb(handle, limb),
            None => Ok(()),
        }
    }

    fn read(&mut self, handle: Addr) -> BridgeResult<u32> {
        let count = significant_limbs(&self.entry(handle)?.value);
        self.read_cursor = Some((handle, 0));
        Ok(count)
    }

    /// Yields `0` once no value is selected.
    fn next_u32(&mut self) -> BridgeResult<u32> {
        let Some((handle, position)) = self.read_cursor else {
            return Ok(0);
        };
        let limb = self
            .entry(handle)?
            .value
            .iter_u32_digits()
            .nth(position as usize)
            .unwrap_or(0);
        self.read_cursor = Some((handle, position + 1));
        Ok(limb)
    }
}

impl ValueCodec for HandleTable {
    fn representation(&self) -> Representation {
        Representation::OpaqueHandle
    }

    fn encode(&mut self, value: &Natural) -> BridgeResult<Addr> {
        encode_handle(self, value)
    }

    fn decode(&mut self, addr: Addr) -> BridgeResult<Natural> {
        decode_handle(self, addr)
    }

    fn is_live(&mut self, addr: Addr) -> bool {
        self.entry(addr).is_ok()
    }
}

impl ImportSurface for HandleTable {
    fn operations(&self) -> Vec<Operation> {
        Operation::for_representation(Representation::OpaqueHandle)
    }

    fn load(&mut self, addr: Addr) -> BridgeResult<Natural> {
        Ok(self.entry(addr)?.value.clone())
    }

    fn store(&mut self, addr: Addr, value: &Natural) -> BridgeResult<()> {
        let entry = self.entry_mut(addr)?;
        entry.value = value.clone();
        entry.pushed = significant_limbs(value);
        Ok(())
    }

    fn new_zero(&mut self) -> BridgeResult<Addr> {
        self.create()
    }

    fn append_limb(&mut self, addr: Addr, limb: u32) -> BridgeResult<()> {
        let entry = self.entry_mut(addr)?;
        let shift = u64::from(entry.pushed) * u64::from(LIMB_BITS);
        entry.value += Natural::from(limb) << shift;
        entry.pushed += 1;
        Ok(())
    }

    fn trace(&mut self) -> &mut Vec<Natural> {
        &mut self.trace
    }

    fn dispatch_native(&mut self, op: Operation, args: &[i32]) -> BridgeResult<Option<i32>> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);
        match op {
            Operation::CreateBigint => self.create().map(|h| Some(h as i32)),
            Operation::PushU32 => self.push_u32(arg(0) as u32).map(|_| None),
            Operation::ReadBigint => self.read(arg(0) as Addr).map(|n| Some(n as i32)),
            Operation::GetNextU32 => self.next_u32().map(|l| Some(l as i32)),
            Operation::FreeBigint => {
                self.free(arg(0) as Addr);
                Ok(None)
            }
            other => Err(crate::LinkError::MissingOperation {
                operation: other.name().to_string(),
                provider: "opaque-handle library".to_string(),
            }
            .into()),
        }
    }
}

impl HandleTable {
    /// Whether the value at `handle` is zero. Convenience for tests and
    /// diagnostics.
    pub fn is_zero(&self, handle: Addr) -> BridgeResult<bool> {
        Ok(self.entry(handle)?.value.is_zero())
    }
}
