use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A required import, export or operation could not be bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// A library that must provide an operation does not.
    #[error("required operation `{operation}` is not provided by {provider}")]
    MissingOperation { operation: String, provider: String },

    /// The module imports something nobody can supply.
    #[error("unresolved import `{module}.{name}`")]
    UnresolvedImport { module: String, name: String },

    /// The import exists but its type does not match what is supplied.
    #[error("incompatible import: {0}")]
    IncompatibleImport(String),

    /// The entry point is not exported as a function.
    #[error("entry point `{0}` not found")]
    MissingEntryPoint(String),

    /// The entry point exists but has a signature the host cannot call.
    #[error("entry point `{name}` has an unsupported signature: {reason}")]
    IncompatibleEntryPoint { name: String, reason: String },
}

/// A binary image or a guest-side representation is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid module image: {0}")]
    InvalidModule(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("null address where a value was expected")]
    NullAddress,

    /// The address does not name an allocated node or handle.
    #[error("address {0} does not refer to a live value")]
    DanglingAddress(u32),

    /// A linked-limb chain visits the same node twice.
    #[error("limb chain starting at {start} revisits node {node}")]
    CyclicChain { start: u32, node: u32 },
}

/// A parameter index outside the entry point's arity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("argument index {index} out of bounds for `{key}` ({})", describe_max(.max))]
pub struct RangeError {
    pub key: String,
    pub index: u64,
    /// Largest valid index, `None` when the entry point takes no arguments.
    pub max: Option<u64>,
}

fn describe_max(max: &Option<u64>) -> String {
    match max {
        Some(max) => format!("expected max index {max}"),
        None => "function takes no arguments".to_string(),
    }
}

/// A value outside the natural numbers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{value} not in the set of natural numbers", key_prefix(.key))]
pub struct DomainError {
    pub key: Option<String>,
    pub value: String,
}

fn key_prefix(key: &Option<String>) -> String {
    key.as_ref().map(|k| format!("{k}=")).unwrap_or_default()
}

/// Top-level error for everything that crosses the host/guest boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("range error: {0}")]
    Range(#[from] RangeError),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// The guest trapped, or a call into a guest library failed.
    #[error("guest trap: {0}")]
    Trap(String),
}

/// A parameter key that could not be interpreted. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWarning {
    pub key: String,
    pub reason: String,
}

impl std::fmt::Display for KeyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid argument key `{}`: {}", self.key, self.reason)
    }
}
