//! Host import surface.
//!
//! The fixed table of operations a guest module is linked against. Every
//! operation takes and returns `i32` only; values are passed as addresses
//! (linked limbs) or handles (opaque form).
//!
//! | Operation            | Signature             | Form   |
//! |----------------------|-----------------------|--------|
//! | `allocate`           | `() -> i32`           | linked |
//! | `create_chunk`       | `(limb) -> i32`       | linked |
//! | `get_value`          | `(node) -> i32`       | linked |
//! | `set_value`          | `(node, limb)`        | linked |
//! | `get_next`           | `(node) -> i32`       | linked |
//! | `set_next`           | `(node, next)`        | linked |
//! | `create_bigint`      | `() -> i32`           | handle |
//! | `push_u32_to_bigint` | `(limb)`              | handle |
//! | `read_bigint`        | `(h) -> i32`          | handle |
//! | `get_next_u32`       | `() -> i32`           | handle |
//! | `free_bigint`        | `(h)`                 | handle |
//! | `add` `sub` `mul` `div` `mod` | `(dst, a, b)` | both   |
//! | `left_shift` `right_shift`    | `(dst, src, amount)` | both |
//! | `is_gt` `is_equal`   | `(a, b) -> i32`       | both   |
//! | `set_to_zero`        | `(v)`                 | both   |
//! | `copy`               | `(dst, src)`          | both   |
//! | `printf`             | `(v) -> i32`          | both   |

use std::fmt;

use num_traits::{ToPrimitive, Zero};

use crate::codec::{Addr, Representation, ValueCodec};
use crate::error::{BridgeError, LinkError};
use crate::value::Natural;
use crate::BridgeResult;

/// Widest value `left_shift` may produce, in bits (128 MiB).
pub const MAX_SHIFT_BITS: u64 = 1 << 30;

/// One entry of the import table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Allocate,
    CreateChunk,
    GetValue,
    SetValue,
    GetNext,
    SetNext,
    CreateBigint,
    PushU32,
    ReadBigint,
    GetNextU32,
    FreeBigint,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LeftShift,
    RightShift,
    IsGt,
    IsEqual,
    SetToZero,
    Copy,
    Printf,
}

/// Operations every representation supports.
pub const ARITHMETIC_OPERATIONS: &[Operation] = &[
    Operation::Add,
    Operation::Sub,
    Operation::Mul,
    Operation::Div,
    Operation::Mod,
    Operation::LeftShift,
    Operation::RightShift,
    Operation::IsGt,
    Operation::IsEqual,
    Operation::SetToZero,
    Operation::Copy,
    Operation::Printf,
];

pub const LINKED_OPERATIONS: &[Operation] = &[
    Operation::Allocate,
    Operation::CreateChunk,
    Operation::GetValue,
    Operation::SetValue,
    Operation::GetNext,
    Operation::SetNext,
];

pub const HANDLE_OPERATIONS: &[Operation] = &[
    Operation::CreateBigint,
    Operation::PushU32,
    Operation::ReadBigint,
    Operation::GetNextU32,
    Operation::FreeBigint,
];

impl Operation {
    /// Import name under the `env` namespace.
    pub fn name(self) -> &'static str {
        match self {
            Self::Allocate => "allocate",
            Self::CreateChunk => "create_chunk",
            Self::GetValue => "get_value",
            Self::SetValue => "set_value",
            Self::GetNext => "get_next",
            Self::SetNext => "set_next",
            Self::CreateBigint => "create_bigint",
            Self::PushU32 => "push_u32_to_bigint",
            Self::ReadBigint => "read_bigint",
            Self::GetNextU32 => "get_next_u32",
            Self::FreeBigint => "free_bigint",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::LeftShift => "left_shift",
            Self::RightShift => "right_shift",
            Self::IsGt => "is_gt",
            Self::IsEqual => "is_equal",
            Self::SetToZero => "set_to_zero",
            Self::Copy => "copy",
            Self::Printf => "printf",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ARITHMETIC_OPERATIONS
            .iter()
            .chain(LINKED_OPERATIONS)
            .chain(HANDLE_OPERATIONS)
            .copied()
            .find(|op| op.name() == name)
    }

    /// Number of `i32` parameters.
    pub fn arity(self) -> usize {
        match self {
            Self::Allocate | Self::CreateBigint | Self::GetNextU32 => 0,
            Self::CreateChunk
            | Self::GetValue
            | Self::GetNext
            | Self::PushU32
            | Self::ReadBigint
            | Self::FreeBigint
            | Self::SetToZero
            | Self::Printf => 1,
            Self::SetValue | Self::SetNext | Self::IsGt | Self::IsEqual | Self::Copy => 2,
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::LeftShift
            | Self::RightShift => 3,
        }
    }

    /// Whether the operation returns one `i32`.
    pub fn returns_value(self) -> bool {
        matches!(
            self,
            Self::Allocate
                | Self::CreateChunk
                | Self::GetValue
                | Self::GetNext
                | Self::CreateBigint
                | Self::ReadBigint
                | Self::GetNextU32
                | Self::IsGt
                | Self::IsEqual
                | Self::Printf
        )
    }

    /// Every operation a guest compiled for `repr` may import.
    pub fn for_representation(repr: Representation) -> Vec<Operation> {
        let specific = match repr {
            Representation::LinkedLimb => LINKED_OPERATIONS,
            Representation::OpaqueHandle => HANDLE_OPERATIONS,
        };
        specific.iter().chain(ARITHMETIC_OPERATIONS).copied().collect()
    }

    /// The operations the host codec needs from whoever owns the values.
    pub fn codec_capabilities(repr: Representation) -> &'static [Operation] {
        match repr {
            Representation::LinkedLimb => &[
                Self::CreateChunk,
                Self::SetNext,
                Self::GetValue,
                Self::GetNext,
            ],
            Representation::OpaqueHandle => &[
                Self::CreateBigint,
                Self::PushU32,
                Self::ReadBigint,
                Self::GetNextU32,
            ],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check that `provided` contains every operation in `required`.
///
/// The first missing operation is reported by name.
pub fn verify_operations<'a, I>(provided: I, required: &[Operation], provider: &str) -> Result<(), LinkError>
where
    I: IntoIterator<Item = &'a str>,
{
    let provided: Vec<&str> = provided.into_iter().collect();
    for op in required {
        if !provided.contains(&op.name()) {
            return Err(LinkError::MissingOperation {
                operation: op.name().to_string(),
                provider: provider.to_string(),
            });
        }
    }
    Ok(())
}

/// A host-side arithmetic library a guest module can be linked against.
///
/// Implementors supply value storage (`load`/`store`), allocation and the
/// representation-specific operations; the arithmetic itself is shared.
/// Results are written into `dst` in place: `dst` may alias an operand, and
/// the addresses of the other operands stay valid.
pub trait ImportSurface: ValueCodec {
    /// Operations this library can serve.
    fn operations(&self) -> Vec<Operation>;

    /// Current value at `addr`.
    fn load(&mut self, addr: Addr) -> BridgeResult<Natural>;

    /// Overwrite the value at `addr`, keeping `addr` valid.
    fn store(&mut self, addr: Addr, value: &Natural) -> BridgeResult<()>;

    /// Allocate a new zero value.
    fn new_zero(&mut self) -> BridgeResult<Addr>;

    /// Append one more-significant limb to the value at `addr`.
    fn append_limb(&mut self, addr: Addr, limb: u32) -> BridgeResult<()>;

    /// Values passed to `printf` so far, oldest first.
    fn trace(&mut self) -> &mut Vec<Natural>;

    /// Serve an operation that only exists for this representation.
    fn dispatch_native(&mut self, op: Operation, args: &[i32]) -> BridgeResult<Option<i32>>;

    fn add(&mut self, dst: Addr, a: Addr, b: Addr) -> BridgeResult<()> {
        let sum = self.load(a)? + self.load(b)?;
        self.store(dst, &sum)
    }

    /// Saturating: `a - b` is zero when `b > a`.
    fn sub(&mut self, dst: Addr, a: Addr, b: Addr) -> BridgeResult<()> {
        let (a, b) = (self.load(a)?, self.load(b)?);
        let diff = if b > a { Natural::zero() } else { a - b };
        self.store(dst, &diff)
    }

    fn mul(&mut self, dst: Addr, a: Addr, b: Addr) -> BridgeResult<()> {
        let product = self.load(a)? * self.load(b)?;
        self.store(dst, &product)
    }

    /// Floor division; division by zero yields zero.
    fn div(&mut self, dst: Addr, a: Addr, b: Addr) -> BridgeResult<()> {
        let (a, b) = (self.load(a)?, self.load(b)?);
        let quotient = if b.is_zero() { Natural::zero() } else { a / b };
        self.store(dst, &quotient)
    }

    /// Modulo by zero yields zero.
    fn rem(&mut self, dst: Addr, a: Addr, b: Addr) -> BridgeResult<()> {
        let (a, b) = (self.load(a)?, self.load(b)?);
        let remainder = if b.is_zero() { Natural::zero() } else { a % b };
        self.store(dst, &remainder)
    }

    /// Shift amounts that do not fit a machine word yield zero. A result
    /// wider than [`MAX_SHIFT_BITS`] traps.
    fn shift_left(&mut self, dst: Addr, src: Addr, amount: Addr) -> BridgeResult<()> {
        let value = self.load(src)?;
        let shifted = match self.load(amount)?.to_u64() {
            _ if value.is_zero() => Natural::zero(),
            Some(bits) => {
                let width = value.bits().saturating_add(bits);
                if width > MAX_SHIFT_BITS {
                    return Err(BridgeError::Trap(format!(
                        "left_shift by {bits} gives a {width}-bit value, limit is {MAX_SHIFT_BITS}"
                    )));
                }
                value << bits
            }
            None => Natural::zero(),
        };
        self.store(dst, &shifted)
    }

    fn shift_right(&mut self, dst: Addr, src: Addr, amount: Addr) -> BridgeResult<()> {
        let value = self.load(src)?;
        let shifted = match self.load(amount)?.to_u64() {
            Some(bits) => value >> bits,
            None => Natural::zero(),
        };
        self.store(dst, &shifted)
    }

    fn is_gt(&mut self, a: Addr, b: Addr) -> BridgeResult<bool> {
        Ok(self.load(a)? > self.load(b)?)
    }

    fn is_equal(&mut self, a: Addr, b: Addr) -> BridgeResult<bool> {
        Ok(self.load(a)? == self.load(b)?)
    }

    fn set_to_zero(&mut self, v: Addr) -> BridgeResult<()> {
        self.store(v, &Natural::zero())
    }

    fn copy(&mut self, dst: Addr, src: Addr) -> BridgeResult<()> {
        let value = self.load(src)?;
        self.store(dst, &value)
    }

    /// Trace hook: record and log the value, hand the address back.
    fn debug_emit(&mut self, v: Addr) -> BridgeResult<Addr> {
        let value = self.decode(v)?;
        tracing::info!(addr = v, %value, "[echo]");
        self.trace().push(value);
        Ok(v)
    }

    /// Run `op` with raw guest arguments.
    fn dispatch(&mut self, op: Operation, args: &[i32]) -> BridgeResult<Option<i32>> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0) as Addr;
        match op {
            Operation::Add => self.add(arg(0), arg(1), arg(2)).map(|_| None),
            Operation::Sub => self.sub(arg(0), arg(1), arg(2)).map(|_| None),
            Operation::Mul => self.mul(arg(0), arg(1), arg(2)).map(|_| None),
            Operation::Div => self.div(arg(0), arg(1), arg(2)).map(|_| None),
            Operation::Mod => self.rem(arg(0), arg(1), arg(2)).map(|_| None),
            Operation::LeftShift => self.shift_left(arg(0), arg(1), arg(2)).map(|_| None),
            Operation::RightShift => self.shift_right(arg(0), arg(1), arg(2)).map(|_| None),
            Operation::IsGt => self.is_gt(arg(0), arg(1)).map(|b| Some(b as i32)),
            Operation::IsEqual => self.is_equal(arg(0), arg(1)).map(|b| Some(b as i32)),
            Operation::SetToZero => self.set_to_zero(arg(0)).map(|_| None),
            Operation::Copy => self.copy(arg(0), arg(1)).map(|_| None),
            Operation::Printf => self.debug_emit(arg(0)).map(|a| Some(a as i32)),
            native => self.dispatch_native(native, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandleTable, LimbArena};

    #[test]
    fn names_round_trip() {
        for repr in [Representation::LinkedLimb, Representation::OpaqueHandle] {
            for op in Operation::for_representation(repr) {
                assert_eq!(Operation::from_name(op.name()), Some(op));
            }
        }
        assert_eq!(Operation::from_name("fib"), None);
    }

    #[test]
    fn codec_capabilities_are_served_by_their_representation() {
        for repr in [Representation::LinkedLimb, Representation::OpaqueHandle] {
            let ops = Operation::for_representation(repr);
            for cap in Operation::codec_capabilities(repr) {
                assert!(ops.contains(cap), "{cap} missing for {repr}");
            }
        }
    }

    #[test]
    fn oversized_left_shift_traps_without_allocating() {
        let mut table = HandleTable::new();
        let one = table.encode(&Natural::from(1u32)).unwrap();
        let huge = table.encode(&Natural::from(u64::MAX)).unwrap();
        let dst = table.new_zero().unwrap();

        let err = table
            .dispatch(Operation::LeftShift, &[dst as i32, one as i32, huge as i32])
            .unwrap_err();

        assert!(matches!(err, BridgeError::Trap(_)), "{err}");
        assert_eq!(table.load(dst).unwrap(), Natural::zero());
    }

    #[test]
    fn left_shift_of_zero_or_by_a_huge_amount_is_zero() {
        let mut arena = LimbArena::new();
        let zero = arena.encode(&Natural::zero()).unwrap();
        let five = arena.encode(&Natural::from(5u32)).unwrap();
        let huge = arena.encode(&Natural::from(u64::MAX)).unwrap();
        let past_word = arena.encode(&(Natural::from(1u32) << 64u32)).unwrap();
        let dst = arena.new_zero().unwrap();

        let args = |src: Addr, amount: Addr| [dst as i32, src as i32, amount as i32];
        arena.dispatch(Operation::LeftShift, &args(zero, huge)).unwrap();
        assert_eq!(arena.load(dst).unwrap(), Natural::zero());
        arena.dispatch(Operation::LeftShift, &args(five, past_word)).unwrap();
        assert_eq!(arena.load(dst).unwrap(), Natural::zero());

        let three = arena.encode(&Natural::from(3u32)).unwrap();
        arena.dispatch(Operation::LeftShift, &args(five, three)).unwrap();
        assert_eq!(arena.load(dst).unwrap(), Natural::from(40u32));
    }

    #[test]
    fn verify_reports_first_missing_operation() {
        let provided = ["create_bigint", "push_u32_to_bigint", "read_bigint"];
        let err = verify_operations(
            provided,
            Operation::codec_capabilities(Representation::OpaqueHandle),
            "gmp library",
        )
        .unwrap_err();
        assert_eq!(
            err,
            LinkError::MissingOperation {
                operation: "get_next_u32".into(),
                provider: "gmp library".into(),
            }
        );
    }
}
