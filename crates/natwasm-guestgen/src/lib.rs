//! natwasm guest module generator.
//!
//! Assembles small guest modules that speak the host import contract, for
//! exercising the host without the real WHILE compiler.
//!
//! ## Imports
//! - every operation of the program's representation under `env`
//!   (see [`natwasm_types::surface`])
//! - optionally `env.memory`
//!
//! ## Exports
//! - the entry point (default `main`), `(i32 × params) -> i32`
//!
//! Besides plain programs the crate emits a linked-limb library module
//! (for chained execution) and a stand-in self-compiler whose output is a
//! fixed program image.

pub mod compiler;
pub mod error;
pub mod library;
pub mod program;
pub mod stub;
pub mod types;

pub use compiler::compile;
pub use error::{GuestGenError, GuestGenResult};
pub use library::{linked_limb_library, linked_limb_library_exporting};
pub use program::{ArithOp, GuestOp, GuestProgram, GuestReturn, Operand};
pub use stub::{compiler_output_for, stub_compiler};
