//! A tiny guest program IR.
//!
//! Enough to express WHILE-style programs over natural numbers: values are
//! created, combined through the host's arithmetic imports, compared in a
//! `while lhs > rhs` loop, traced and returned. Everything is a value
//! address or handle held in an `i32` local.

use natwasm_types::surface::Operation;
use natwasm_types::{Natural, Representation};

use crate::types::DEFAULT_ENTRY;

/// A value slot: an entry-point parameter or a body local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Param(u32),
    Local(u32),
}

/// Arithmetic imports of the shape `op(dst, lhs, rhs)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LeftShift,
    RightShift,
}

impl ArithOp {
    pub fn operation(self) -> Operation {
        match self {
            Self::Add => Operation::Add,
            Self::Sub => Operation::Sub,
            Self::Mul => Operation::Mul,
            Self::Div => Operation::Div,
            Self::Mod => Operation::Mod,
            Self::LeftShift => Operation::LeftShift,
            Self::RightShift => Operation::RightShift,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuestOp {
    /// `local := new zero value`
    Zero(u32),
    /// `local := constant`
    Constant(u32, Natural),
    /// `dst := lhs op rhs`
    Arith {
        op: ArithOp,
        dst: Operand,
        lhs: Operand,
        rhs: Operand,
    },
    Copy { dst: Operand, src: Operand },
    SetToZero(Operand),
    /// Trace through the host `printf` hook.
    Print(Operand),
    /// Release a handle (opaque-handle form only).
    Free(Operand),
    /// `while lhs > rhs { body }`
    WhileGt {
        lhs: Operand,
        rhs: Operand,
        body: Vec<GuestOp>,
    },
    /// Unconditional trap.
    Trap,
}

/// What the entry point hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestReturn {
    Value(Operand),
    /// A raw scalar that is not a value.
    Scalar(i32),
    Nothing,
}

#[derive(Debug, Clone)]
pub struct GuestProgram {
    pub representation: Representation,
    pub params: u32,
    pub locals: u32,
    pub body: Vec<GuestOp>,
    pub ret: GuestReturn,
    pub entry: String,
    /// Import `env.memory` (as modules built against a shared-memory
    /// library do).
    pub import_memory: bool,
    /// Additional `(i32) -> ()` function imports under `env`.
    pub extra_imports: Vec<String>,
}

impl GuestProgram {
    pub fn new(representation: Representation, params: u32) -> Self {
        Self {
            representation,
            params,
            locals: 0,
            body: Vec::new(),
            ret: GuestReturn::Nothing,
            entry: DEFAULT_ENTRY.to_string(),
            import_memory: false,
            extra_imports: Vec::new(),
        }
    }

    pub fn locals(mut self, locals: u32) -> Self {
        self.locals = locals;
        self
    }

    pub fn op(mut self, op: GuestOp) -> Self {
        self.body.push(op);
        self
    }

    pub fn returns(mut self, ret: GuestReturn) -> Self {
        self.ret = ret;
        self
    }

    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = name.into();
        self
    }

    pub fn with_memory_import(mut self) -> Self {
        self.import_memory = true;
        self
    }

    pub fn with_extra_import(mut self, name: impl Into<String>) -> Self {
        self.extra_imports.push(name.into());
        self
    }

    // ── Canned programs ──────────────────────────────────────────────────

    /// `main(n1, n2) = n1 + n2`, into a fresh value.
    pub fn adder(repr: Representation) -> Self {
        Self::binary(repr, ArithOp::Add)
    }

    /// `main(n1, n2) = n1 <op> n2`, into a fresh value.
    pub fn binary(repr: Representation, op: ArithOp) -> Self {
        Self::new(repr, 2)
            .locals(1)
            .op(GuestOp::Zero(0))
            .op(GuestOp::Arith {
                op,
                dst: Operand::Local(0),
                lhs: Operand::Param(0),
                rhs: Operand::Param(1),
            })
            .returns(GuestReturn::Value(Operand::Local(0)))
    }

    /// Traces and returns its first parameter.
    pub fn echo(repr: Representation, params: u32) -> Self {
        Self::new(repr, params)
            .op(GuestOp::Print(Operand::Param(0)))
            .returns(GuestReturn::Value(Operand::Param(0)))
    }

    /// Multiplication by repeated addition, the way a WHILE program
    /// computes it:
    ///
    /// ```text
    /// x0 := 0; while n2 > 0 { x0 := x0 + n1; n2 := n2 - 1 }
    /// ```
    pub fn multiply_by_addition(repr: Representation) -> Self {
        Self::new(repr, 2)
            .locals(3)
            .op(GuestOp::Zero(0))
            .op(GuestOp::Constant(1, Natural::from(1u32)))
            .op(GuestOp::Zero(2))
            .op(GuestOp::WhileGt {
                lhs: Operand::Param(1),
                rhs: Operand::Local(2),
                body: vec![
                    GuestOp::Arith {
                        op: ArithOp::Add,
                        dst: Operand::Local(0),
                        lhs: Operand::Local(0),
                        rhs: Operand::Param(0),
                    },
                    GuestOp::Arith {
                        op: ArithOp::Sub,
                        dst: Operand::Param(1),
                        lhs: Operand::Param(1),
                        rhs: Operand::Local(1),
                    },
                ],
            })
            .returns(GuestReturn::Value(Operand::Local(0)))
    }

    /// Ignores its parameters and returns `value`.
    pub fn constant(repr: Representation, params: u32, value: Natural) -> Self {
        Self::new(repr, params)
            .locals(1)
            .op(GuestOp::Constant(0, value))
            .returns(GuestReturn::Value(Operand::Local(0)))
    }
}
