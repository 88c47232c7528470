//! natwasm self-hosting: a guest compiler turns source text into a new
//! guest module, which is then run.
//!
//! Pipeline: source → [`canonicalize`] → compiler invocation `(n1, n2)` →
//! [`decode_compiler_output`] → program invocation → result. See
//! [`SelfHostPipeline`] for the state machine.

pub mod canonical;
pub mod config;
mod error;
pub mod image;
pub mod pipeline;

pub use canonical::{canonicalize, CanonicalText};
pub use config::{PipelineConfig, DEFAULT_TIMEOUT_SECS};
pub use error::{ConfigError, PipelineError, PipelineStage, StageError};
pub use image::{
    decode_compiler_output, even_hex, image_digest, prefixed_hex, validate_image, WASM_MAGIC,
};
pub use pipeline::{
    PipelineReport, PipelineState, SelfHostPipeline, StageRun, COMPILER_OUTPUT_FILE,
    COMPILER_OUTPUT_HEX_FILE, PROGRAM_FILE,
};
