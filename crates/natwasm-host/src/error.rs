//! Host error types.

use natwasm_types::{BridgeError, DomainError, FormatError, LinkError, RangeError};
use thiserror::Error;

/// A parameter set that cannot be turned into an argument list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Everything that can abort one module invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("range error: {0}")]
    Range(RangeError),

    #[error("domain error: {0}")]
    Domain(DomainError),

    /// Guest trap, or a host operation that failed mid-call.
    #[error("guest trap: {0}")]
    Trap(String),
}

impl From<MarshalError> for InvokeError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::Range(e) => Self::Range(e),
            MarshalError::Domain(e) => Self::Domain(e),
        }
    }
}

impl From<BridgeError> for InvokeError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Link(e) => Self::Link(e),
            BridgeError::Format(e) => Self::Format(e),
            BridgeError::Range(e) => Self::Range(e),
            BridgeError::Domain(e) => Self::Domain(e),
            BridgeError::Trap(msg) => Self::Trap(msg),
        }
    }
}

/// Invocation result type alias.
pub type InvokeResult<T> = Result<T, InvokeError>;
