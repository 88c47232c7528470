//! Chained library modules.
//!
//! A library is a guest module that owns values in its own memory and
//! exports the operations to build and read them. When a program is
//! chained to a library, the host reaches the library's values only
//! through those exports: [`LibraryCodec`] implements the codec
//! capabilities (and, for linked limbs, the arithmetic surface) by calling
//! back into the library instance.

use std::collections::BTreeMap;

use wasmi::{AsContext, AsContextMut, Func, Instance, Val};

use natwasm_types::codec::{decode_handle, decode_linked, encode_handle, encode_linked};
use natwasm_types::value::to_limbs;
use natwasm_types::{
    verify_operations, Addr, BridgeError, BridgeResult, ImportSurface, LimbAccumulator, LimbChain,
    LinkError, Natural, Operation, Representation, ValueCodec, NULL_ADDR,
};

const PROVIDER: &str = "chained library";

/// Check that a library exports the codec capabilities of `repr`.
pub fn verify_library<'a, I>(exported: I, repr: Representation) -> Result<(), LinkError>
where
    I: IntoIterator<Item = &'a str>,
{
    verify_operations(exported, Operation::codec_capabilities(repr), PROVIDER)
}

/// Function exports of an instantiated library, by operation.
#[derive(Debug, Clone)]
pub struct LibraryFuncs {
    representation: Representation,
    funcs: BTreeMap<Operation, Func>,
}

impl LibraryFuncs {
    /// Collect the operation exports of `instance`, verifying the codec
    /// capabilities first.
    pub fn resolve(
        ctx: impl AsContext,
        instance: &Instance,
        repr: Representation,
    ) -> Result<Self, LinkError> {
        let funcs: BTreeMap<Operation, Func> = instance
            .exports(ctx.as_context())
            .filter_map(|export| {
                let op = Operation::from_name(export.name())?;
                let func = export.into_func()?;
                Some((op, func))
            })
            .collect();
        verify_library(funcs.keys().map(|op| op.name()), repr)?;
        Ok(Self {
            representation: repr,
            funcs,
        })
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn get(&self, op: Operation) -> Option<Func> {
        self.funcs.get(&op).copied()
    }

    pub fn provides(&self, op: Operation) -> bool {
        self.funcs.contains_key(&op)
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.funcs.keys().copied().collect()
    }
}

/// Codec over a library instance, reached through its exports.
pub struct LibraryCodec<'f, C> {
    ctx: C,
    funcs: &'f LibraryFuncs,
    trace: Vec<Natural>,
}

impl<'f, C: AsContextMut> LibraryCodec<'f, C> {
    pub fn new(ctx: C, funcs: &'f LibraryFuncs) -> Self {
        Self {
            ctx,
            funcs,
            trace: Vec::new(),
        }
    }

    /// Values traced through `printf` while this codec was in use.
    pub fn take_trace(&mut self) -> Vec<Natural> {
        std::mem::take(&mut self.trace)
    }

    /// Call the library's export for `op`.
    pub fn call(&mut self, op: Operation, args: &[i32]) -> BridgeResult<Option<i32>> {
        let func = self.funcs.get(op).ok_or_else(|| LinkError::MissingOperation {
            operation: op.name().to_string(),
            provider: PROVIDER.to_string(),
        })?;
        let params: Vec<Val> = args.iter().map(|a| Val::I32(*a)).collect();
        let mut results = [Val::I32(0)];
        let returns = usize::from(op.returns_value());
        func.call(&mut self.ctx, &params, &mut results[..returns])
            .map_err(|e| BridgeError::Trap(format!("library `{op}`: {e}")))?;
        Ok(if returns == 1 { results[0].i32() } else { None })
    }

    fn call_value(&mut self, op: Operation, args: &[i32]) -> BridgeResult<i32> {
        Ok(self.call(op, args)?.unwrap_or(0))
    }

    fn unsupported(&self, what: &str) -> BridgeError {
        LinkError::MissingOperation {
            operation: what.to_string(),
            provider: format!("{PROVIDER} ({})", self.funcs.representation),
        }
        .into()
    }
}

impl<C: AsContextMut> LimbChain for LibraryCodec<'_, C> {
    fn create_chunk(&mut self, limb: u32) -> BridgeResult<Addr> {
        Ok(self.call_value(Operation::CreateChunk, &[limb as i32])? as Addr)
    }

    fn set_next(&mut self, node: Addr, next: Addr) -> BridgeResult<()> {
        self.call(Operation::SetNext, &[node as i32, next as i32]).map(|_| ())
    }

    /// Reads may come back signed; the limb is the same 32 bits.
    fn get_value(&mut self, node: Addr) -> BridgeResult<u32> {
        Ok(self.call_value(Operation::GetValue, &[node as i32])? as u32)
    }

    fn get_next(&mut self, node: Addr) -> BridgeResult<Addr> {
        Ok(self.call_value(Operation::GetNext, &[node as i32])? as Addr)
    }
}

impl<C: AsContextMut> LimbAccumulator for LibraryCodec<'_, C> {
    fn create(&mut self) -> BridgeResult<Addr> {
        Ok(self.call_value(Operation::CreateBigint, &[])? as Addr)
    }

    fn push_u32(&mut self, limb: u32) -> BridgeResult<()> {
        self.call(Operation::PushU32, &[limb as i32]).map(|_| ())
    }

    fn read(&mut self, handle: Addr) -> BridgeResult<u32> {
        Ok(self.call_value(Operation::ReadBigint, &[handle as i32])? as u32)
    }

    fn next_u32(&mut self) -> BridgeResult<u32> {
        Ok(self.call_value(Operation::GetNextU32, &[])? as u32)
    }
}

impl<C: AsContextMut> ValueCodec for LibraryCodec<'_, C> {
    fn representation(&self) -> Representation {
        self.funcs.representation
    }

    fn encode(&mut self, value: &Natural) -> BridgeResult<Addr> {
        match self.funcs.representation {
            Representation::LinkedLimb => encode_linked(self, value),
            Representation::OpaqueHandle => encode_handle(self, value),
        }
    }

    fn decode(&mut self, addr: Addr) -> BridgeResult<Natural> {
        match self.funcs.representation {
            Representation::LinkedLimb => decode_linked(self, addr),
            Representation::OpaqueHandle => decode_handle(self, addr),
        }
    }
}

/// Host-side arithmetic over library-owned values.
///
/// Only linked limbs can be rewritten in place from outside (the library
/// must export `set_value`); a handle library has no way to overwrite a
/// value, so it must export its own arithmetic.
impl<C: AsContextMut> ImportSurface for LibraryCodec<'_, C> {
    fn operations(&self) -> Vec<Operation> {
        self.funcs.operations()
    }

    fn load(&mut self, addr: Addr) -> BridgeResult<Natural> {
        self.decode(addr)
    }

    fn store(&mut self, addr: Addr, value: &Natural) -> BridgeResult<()> {
        if self.funcs.representation != Representation::LinkedLimb {
            return Err(self.unsupported("store"));
        }
        let limbs = to_limbs(value);
        let mut node = addr;
        for (i, limb) in limbs.iter().enumerate() {
            self.call(Operation::SetValue, &[node as i32, *limb as i32])?;
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
        self.encode(&Natural::default())
    }

    fn append_limb(&mut self, addr: Addr, limb: u32) -> BridgeResult<()> {
        if self.funcs.representation != Representation::LinkedLimb {
            return Err(self.unsupported("append_limb"));
        }
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
        self.call(op, args)
    }
}
