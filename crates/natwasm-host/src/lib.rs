//! natwasm host: runs guest modules that compute on natural numbers.
//!
//! Pipeline for one call: Module → import binding → entry point
//! introspection → Argument Marshaller → call → Result Extractor.
//!
//! The arithmetic behind the imports is pluggable: any
//! [`natwasm_types::ImportSurface`] can back an invocation, and a program
//! can also be chained to a library module whose exports serve its
//! imports.

mod error;
pub mod invoker;
pub mod library;
pub mod marshal;

pub use error::{InvokeError, InvokeResult, MarshalError};
pub use invoker::{
    invoke, invoke_chained, surface_for, EntryResult, Invocation, InvokeOptions, Invoker,
    DEFAULT_ENTRY, ENV_MODULE,
};
pub use library::{verify_library, LibraryCodec, LibraryFuncs};
pub use marshal::{marshal, params, Marshalled, Naming, ParamValue, Params};
