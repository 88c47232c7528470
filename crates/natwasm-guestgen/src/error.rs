//! Guest generation error types.

use thiserror::Error;

/// Errors that can occur while assembling a guest module.
#[derive(Debug, Error)]
pub enum GuestGenError {
    /// The program uses something its representation cannot express.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An operand names a parameter or local the program does not declare.
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// The generated WASM module failed validation.
    #[error("WASM validation failed: {0}")]
    ValidationFailed(String),
}

/// Guest generation result type alias.
pub type GuestGenResult<T> = Result<T, GuestGenError>;
