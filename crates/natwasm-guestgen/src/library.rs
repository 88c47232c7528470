//! A linked-limb library module.
//!
//! Owns its linear memory and a bump heap, and exports the node
//! primitives so another module (and the host codec) can work on values
//! that live in it:
//!
//! | Export         | Signature        |
//! |----------------|------------------|
//! | `memory`       | memory           |
//! | `allocate`     | `() -> i32`      |
//! | `create_chunk` | `(limb) -> i32`  |
//! | `get_value`    | `(node) -> i32`  |
//! | `set_value`    | `(node, limb)`   |
//! | `get_next`     | `(node) -> i32`  |
//! | `set_next`     | `(node, next)`   |
//! | `set_to_zero`  | `(node)`         |
//!
//! Nodes are 8 bytes, `[limb: u32 | next: u32]`, and are never reused, so a
//! freshly allocated node is always zeroed.

use wasm_encoder::{
    CodeSection, ConstExpr, ExportKind, ExportSection, Function, FunctionSection, GlobalSection,
    GlobalType, Instruction, MemorySection, MemoryType, Module, ValType,
};

use natwasm_types::surface::Operation;

use crate::error::{GuestGenError, GuestGenResult};
use crate::types::*;

const GLOBAL_HEAP_PTR: u32 = 0;

/// Functions in definition order; the position is the function index.
const LIBRARY_FUNCTIONS: &[Operation] = &[
    Operation::Allocate,
    Operation::CreateChunk,
    Operation::GetValue,
    Operation::SetValue,
    Operation::GetNext,
    Operation::SetNext,
    Operation::SetToZero,
];

/// The library with every function exported.
pub fn linked_limb_library() -> GuestGenResult<Vec<u8>> {
    linked_limb_library_exporting(LIBRARY_FUNCTIONS)
}

/// The library exporting only `exports` (plus `memory`).
pub fn linked_limb_library_exporting(exports: &[Operation]) -> GuestGenResult<Vec<u8>> {
    let mut types = TypeTable::new();
    let mut functions = FunctionSection::new();
    let mut code = CodeSection::new();
    for op in LIBRARY_FUNCTIONS {
        functions.function(types.index(op.arity(), op.returns_value()));
        code.function(&emit_function(*op));
    }

    let mut memory = MemorySection::new();
    memory.memory(MemoryType {
        minimum: INITIAL_MEMORY_PAGES,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });

    let mut globals = GlobalSection::new();
    globals.global(
        GlobalType {
            val_type: ValType::I32,
            mutable: true,
            shared: false,
        },
        &ConstExpr::i32_const(LIBRARY_HEAP_START),
    );

    let mut export_section = ExportSection::new();
    export_section.export("memory", ExportKind::Memory, 0);
    for op in exports {
        let index = LIBRARY_FUNCTIONS
            .iter()
            .position(|f| f == op)
            .ok_or_else(|| GuestGenError::Unsupported(format!("library cannot export `{op}`")))?;
        export_section.export(op.name(), ExportKind::Func, index as u32);
    }

    let mut module = Module::new();
    module.section(&types.emit());
    module.section(&functions);
    module.section(&memory);
    module.section(&globals);
    module.section(&export_section);
    module.section(&code);

    let wasm_bytes = module.finish();
    wasmparser::validate(&wasm_bytes)
        .map_err(|e| GuestGenError::ValidationFailed(format!("{e}")))?;
    Ok(wasm_bytes)
}

fn function_index(op: Operation) -> u32 {
    LIBRARY_FUNCTIONS
        .iter()
        .position(|f| *f == op)
        .unwrap_or_default() as u32
}

fn emit_function(op: Operation) -> Function {
    match op {
        Operation::Allocate => emit_allocate(),
        Operation::CreateChunk => emit_create_chunk(),
        Operation::GetValue => emit_load(0),
        Operation::GetNext => emit_load(4),
        Operation::SetValue => emit_store(0),
        Operation::SetNext => emit_store(4),
        _ => emit_set_to_zero(),
    }
}

/// `allocate() -> i32`: bump the heap by one node, growing memory when the
/// node would cross the end.
fn emit_allocate() -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 0: ptr
    f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::LocalSet(0));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Const(NODE_SIZE));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::GlobalSet(GLOBAL_HEAP_PTR));

    // if heap_ptr > memory.size << 16 { memory.grow(1) or trap }
    f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::MemorySize(0));
    f.instruction(&Instruction::I32Const(PAGE_SHIFT));
    f.instruction(&Instruction::I32Shl);
    f.instruction(&Instruction::I32GtU);
    f.instruction(&Instruction::If(wasm_encoder::BlockType::Empty));
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::MemoryGrow(0));
    f.instruction(&Instruction::I32Const(-1));
    f.instruction(&Instruction::I32Eq);
    f.instruction(&Instruction::If(wasm_encoder::BlockType::Empty));
    f.instruction(&Instruction::Unreachable);
    f.instruction(&Instruction::End);
    f.instruction(&Instruction::End);

    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::End);
    f
}

/// `create_chunk(limb) -> i32`
fn emit_create_chunk() -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 1: node
    f.instruction(&Instruction::Call(function_index(Operation::Allocate)));
    f.instruction(&Instruction::LocalTee(1));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Store(memarg(0, 2)));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::End);
    f
}

fn emit_load(offset: u64) -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Load(memarg(offset, 2)));
    f.instruction(&Instruction::End);
    f
}

fn emit_store(offset: u64) -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Store(memarg(offset, 2)));
    f.instruction(&Instruction::End);
    f
}

/// `set_to_zero(node)`: single zero limb, chain cut.
fn emit_set_to_zero() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I64Const(0));
    f.instruction(&Instruction::I64Store(memarg(0, 2)));
    f.instruction(&Instruction::End);
    f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_library_validates() {
        let wasm = linked_limb_library().unwrap();
        assert_eq!(&wasm[0..4], b"\0asm");
    }

    #[test]
    fn unknown_export_is_rejected() {
        let err = linked_limb_library_exporting(&[Operation::Mul]).unwrap_err();
        assert!(matches!(err, GuestGenError::Unsupported(_)));
    }
}
