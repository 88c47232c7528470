//! Shared types for the natwasm host.
//!
//! This crate defines the natural-number value model shared by host and
//! guest, the two guest-side representations of a value (linked limbs and
//! opaque handles), the codecs between them, the host-side arithmetic
//! libraries backing each representation, and the error taxonomy used by
//! every later stage.

mod error;
pub mod arena;
pub mod codec;
pub mod handles;
pub mod surface;
pub mod value;

pub use arena::LimbArena;
pub use codec::{Addr, LimbAccumulator, LimbChain, Representation, ValueCodec, NULL_ADDR};
pub use error::{BridgeError, DomainError, FormatError, KeyWarning, LinkError, RangeError};
pub use handles::HandleTable;
pub use surface::{verify_operations, ImportSurface, Operation, MAX_SHIFT_BITS};
pub use value::Natural;

/// Result type used throughout the natwasm host.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
