//! Guest module assembler.
//!
//! 1. Intern signatures and emit one `env` import per surface operation
//! 2. Emit the entry point body from the program IR
//! 3. Assemble sections into a module
//! 4. Validate with `wasmparser`

use std::borrow::Cow;

use natwasm_types::surface::Operation;
use natwasm_types::value::to_limbs;
use natwasm_types::Representation;
use wasm_encoder::{
    BlockType, CodeSection, CustomSection, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, ImportSection, Instruction, MemoryType, Module, ValType,
};

use crate::error::{GuestGenError, GuestGenResult};
use crate::program::{GuestOp, GuestProgram, GuestReturn, Operand};
use crate::types::*;

/// Compile a [`GuestProgram`] into a `.wasm` binary.
pub fn compile(program: &GuestProgram) -> GuestGenResult<Vec<u8>> {
    Assembler::new(program).assemble()
}

struct Assembler<'a> {
    program: &'a GuestProgram,
    types: TypeTable,
    /// Function imports in index order.
    operations: Vec<Operation>,
}

impl<'a> Assembler<'a> {
    fn new(program: &'a GuestProgram) -> Self {
        Self {
            program,
            types: TypeTable::new(),
            operations: Operation::for_representation(program.representation),
        }
    }

    fn assemble(&mut self) -> GuestGenResult<Vec<u8>> {
        let imports = self.emit_imports();
        let import_count = (self.operations.len() + self.program.extra_imports.len()) as u32;

        let returns = !matches!(self.program.ret, GuestReturn::Nothing);
        let entry_type = self.types.index(self.program.params as usize, returns);
        let mut functions = FunctionSection::new();
        functions.function(entry_type);

        let mut code = CodeSection::new();
        code.function(&self.emit_entry()?);

        let mut exports = ExportSection::new();
        exports.export(&self.program.entry, ExportKind::Func, import_count);

        let mut module = Module::new();
        module.section(&self.types.emit());
        module.section(&imports);
        module.section(&functions);
        module.section(&exports);
        module.section(&code);
        module.section(&CustomSection {
            name: Cow::Borrowed(CUSTOM_SECTION_NAME),
            data: Cow::Borrowed(GENERATOR_VERSION.as_bytes()),
        });

        let wasm_bytes = module.finish();
        wasmparser::validate(&wasm_bytes)
            .map_err(|e| GuestGenError::ValidationFailed(format!("{e}")))?;
        Ok(wasm_bytes)
    }

    // ── Imports ──────────────────────────────────────────────────────────

    fn emit_imports(&mut self) -> ImportSection {
        let mut imports = ImportSection::new();
        for op in self.operations.clone() {
            let ty = self.types.index(op.arity(), op.returns_value());
            imports.import(ENV_MODULE, op.name(), EntityType::Function(ty));
        }
        for name in &self.program.extra_imports {
            let ty = self.types.index(1, false);
            imports.import(ENV_MODULE, name, EntityType::Function(ty));
        }
        if self.program.import_memory {
            imports.import(
                ENV_MODULE,
                "memory",
                EntityType::Memory(MemoryType {
                    minimum: INITIAL_MEMORY_PAGES,
                    maximum: None,
                    memory64: false,
                    shared: false,
                    page_size_log2: None,
                }),
            );
        }
        imports
    }

    fn call(&self, op: Operation) -> GuestGenResult<Instruction<'static>> {
        self.operations
            .iter()
            .position(|o| *o == op)
            .map(|idx| Instruction::Call(idx as u32))
            .ok_or_else(|| {
                GuestGenError::Unsupported(format!(
                    "`{op}` is not available for {}",
                    self.program.representation
                ))
            })
    }

    // ── Entry point ──────────────────────────────────────────────────────

    fn local(&self, operand: Operand) -> GuestGenResult<u32> {
        match operand {
            Operand::Param(i) if i < self.program.params => Ok(i),
            Operand::Local(i) if i < self.program.locals => Ok(self.program.params + i),
            other => Err(GuestGenError::InvalidOperand(format!(
                "{other:?} (program declares {} params, {} locals)",
                self.program.params, self.program.locals
            ))),
        }
    }

    /// Two scratch locals after the declared ones, for chain building.
    fn scratch(&self) -> (u32, u32) {
        let base = self.program.params + self.program.locals;
        (base, base + 1)
    }

    fn emit_entry(&self) -> GuestGenResult<Function> {
        let mut f = Function::new(vec![(self.program.locals + 2, ValType::I32)]);
        for op in &self.program.body {
            self.emit_op(op, &mut f)?;
        }
        match &self.program.ret {
            GuestReturn::Value(operand) => {
                f.instruction(&Instruction::LocalGet(self.local(*operand)?));
            }
            GuestReturn::Scalar(value) => {
                f.instruction(&Instruction::I32Const(*value));
            }
            GuestReturn::Nothing => {}
        }
        f.instruction(&Instruction::End);
        Ok(f)
    }

    fn emit_op(&self, op: &GuestOp, f: &mut Function) -> GuestGenResult<()> {
        match op {
            GuestOp::Zero(local) => {
                let target = self.local(Operand::Local(*local))?;
                self.emit_new_zero(f)?;
                f.instruction(&Instruction::LocalSet(target));
            }
            GuestOp::Constant(local, value) => {
                let target = self.local(Operand::Local(*local))?;
                self.emit_constant(target, value, f)?;
            }
            GuestOp::Arith { op, dst, lhs, rhs } => {
                f.instruction(&Instruction::LocalGet(self.local(*dst)?));
                f.instruction(&Instruction::LocalGet(self.local(*lhs)?));
                f.instruction(&Instruction::LocalGet(self.local(*rhs)?));
                f.instruction(&self.call(op.operation())?);
            }
            GuestOp::Copy { dst, src } => {
                f.instruction(&Instruction::LocalGet(self.local(*dst)?));
                f.instruction(&Instruction::LocalGet(self.local(*src)?));
                f.instruction(&self.call(Operation::Copy)?);
            }
            GuestOp::SetToZero(operand) => {
                f.instruction(&Instruction::LocalGet(self.local(*operand)?));
                f.instruction(&self.call(Operation::SetToZero)?);
            }
            GuestOp::Print(operand) => {
                f.instruction(&Instruction::LocalGet(self.local(*operand)?));
                f.instruction(&self.call(Operation::Printf)?);
                f.instruction(&Instruction::Drop);
            }
            GuestOp::Free(operand) => {
                f.instruction(&Instruction::LocalGet(self.local(*operand)?));
                f.instruction(&self.call(Operation::FreeBigint)?);
            }
            GuestOp::WhileGt { lhs, rhs, body } => {
                f.instruction(&Instruction::Block(BlockType::Empty));
                f.instruction(&Instruction::Loop(BlockType::Empty));
                f.instruction(&Instruction::LocalGet(self.local(*lhs)?));
                f.instruction(&Instruction::LocalGet(self.local(*rhs)?));
                f.instruction(&self.call(Operation::IsGt)?);
                f.instruction(&Instruction::I32Eqz);
                f.instruction(&Instruction::BrIf(1));
                for inner in body {
                    self.emit_op(inner, f)?;
                }
                f.instruction(&Instruction::Br(0));
                f.instruction(&Instruction::End);
                f.instruction(&Instruction::End);
            }
            GuestOp::Trap => {
                f.instruction(&Instruction::Unreachable);
            }
        }
        Ok(())
    }

    fn emit_new_zero(&self, f: &mut Function) -> GuestGenResult<()> {
        match self.program.representation {
            Representation::LinkedLimb => {
                f.instruction(&Instruction::I32Const(0));
                f.instruction(&self.call(Operation::CreateChunk)?);
            }
            Representation::OpaqueHandle => {
                f.instruction(&self.call(Operation::CreateBigint)?);
            }
        }
        Ok(())
    }

    /// Build a constant at run time through the same imports the host
    /// codec uses.
    fn emit_constant(
        &self,
        target: u32,
        value: &natwasm_types::Natural,
        f: &mut Function,
    ) -> GuestGenResult<()> {
        match self.program.representation {
            Representation::OpaqueHandle => {
                f.instruction(&self.call(Operation::CreateBigint)?);
                f.instruction(&Instruction::LocalSet(target));
                for limb in value.to_u32_digits() {
                    f.instruction(&Instruction::I32Const(limb as i32));
                    f.instruction(&self.call(Operation::PushU32)?);
                }
            }
            Representation::LinkedLimb => {
                let (prev, node) = self.scratch();
                let limbs = to_limbs(value);
                f.instruction(&Instruction::I32Const(limbs[0] as i32));
                f.instruction(&self.call(Operation::CreateChunk)?);
                f.instruction(&Instruction::LocalTee(target));
                f.instruction(&Instruction::LocalSet(prev));
                for limb in &limbs[1..] {
                    f.instruction(&Instruction::I32Const(*limb as i32));
                    f.instruction(&self.call(Operation::CreateChunk)?);
                    f.instruction(&Instruction::LocalSet(node));
                    f.instruction(&Instruction::LocalGet(prev));
                    f.instruction(&Instruction::LocalGet(node));
                    f.instruction(&self.call(Operation::SetNext)?);
                    f.instruction(&Instruction::LocalGet(node));
                    f.instruction(&Instruction::LocalSet(prev));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adder_validates_for_both_representations() {
        for repr in [Representation::LinkedLimb, Representation::OpaqueHandle] {
            let wasm = compile(&GuestProgram::adder(repr)).unwrap();
            assert_eq!(&wasm[0..4], b"\0asm");
        }
    }

    #[test]
    fn free_is_rejected_for_linked_limbs() {
        let program = GuestProgram::new(Representation::LinkedLimb, 1)
            .op(GuestOp::Free(Operand::Param(0)));
        assert!(matches!(compile(&program), Err(GuestGenError::Unsupported(_))));
    }

    #[test]
    fn undeclared_operand_is_rejected() {
        let program = GuestProgram::new(Representation::OpaqueHandle, 1)
            .returns(GuestReturn::Value(Operand::Local(0)));
        assert!(matches!(compile(&program), Err(GuestGenError::InvalidOperand(_))));
    }
}
