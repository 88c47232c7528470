//! Self-host error types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use natwasm_host::InvokeError;
use natwasm_types::FormatError;

/// Where the pipeline is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Encoding,
    CompilerRunning,
    Decoding,
    ProgramRunning,
    Done,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Encoding => "encoding",
            Self::CompilerRunning => "compiler_running",
            Self::Decoding => "decoding",
            Self::ProgramRunning => "program_running",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure inside one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Format(#[from] FormatError),

    /// A source character has no single-byte encoding.
    #[error("source character {ch:?} at offset {offset} does not fit in one byte")]
    WideCharacter { offset: usize, ch: char },

    /// The compiler returned something other than a value.
    #[error("compiler returned `{0}` instead of a value")]
    NoCompilerOutput(String),

    #[error("failed to write {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },
}

/// A stage failure tagged with the stage it happened in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub source: StageError,
}

/// Errors loading a pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_names_the_stage() {
        let err = PipelineError {
            stage: PipelineStage::Decoding,
            source: FormatError::InvalidModule("missing magic".into()).into(),
        };
        assert_eq!(
            err.to_string(),
            "decoding stage failed: invalid module image: missing magic"
        );
    }

    #[test]
    fn stages_serialize_snake_case() {
        let json = serde_json::to_string(&PipelineStage::CompilerRunning).unwrap();
        assert_eq!(json, "\"compiler_running\"");
    }
}
