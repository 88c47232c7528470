//! Pipeline configuration.
//!
//! ```toml
//! representation = "opaque_handle"
//! program_representation = "linked_limb"
//! program_naming = "zero_based"
//! entry_point = "main"
//! no_execution = false
//! output_dir = "out"
//! timeout_secs = 100
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use natwasm_host::{Naming, DEFAULT_ENTRY};
use natwasm_types::Representation;

use crate::error::ConfigError;

/// Seconds a self-host run may take before the caller gives up on it.
pub const DEFAULT_TIMEOUT_SECS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Representation the self-compiler is built against.
    pub representation: Representation,
    /// Representation the compiled program is built against.
    pub program_representation: Representation,
    /// Key convention for the program's parameters.
    pub program_naming: Naming,
    /// Entry point of the compiled program.
    pub entry_point: String,
    /// Stop once the image is decoded.
    pub no_execution: bool,
    /// Where to write the compiler output and the image, if anywhere.
    pub output_dir: Option<PathBuf>,
    /// `None` waits forever.
    pub timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            representation: Representation::OpaqueHandle,
            program_representation: Representation::OpaqueHandle,
            program_naming: Naming::OneBased,
            entry_point: DEFAULT_ENTRY.to_string(),
            no_execution: false,
            output_dir: None,
            timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_the_default() {
        assert_eq!(PipelineConfig::from_toml_str("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn keys_override_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            program_representation = "linked_limb"
            program_naming = "zero_based"
            no_execution = true
            output_dir = "out"
            "#,
        )
        .unwrap();
        assert_eq!(config.representation, Representation::OpaqueHandle);
        assert_eq!(config.program_representation, Representation::LinkedLimb);
        assert_eq!(config.program_naming, Naming::ZeroBased);
        assert!(config.no_execution);
        assert_eq!(config.output_dir.as_deref(), Some(Path::new("out")));
        assert_eq!(config.entry_point, "main");
    }

    #[test]
    fn unknown_representation_is_rejected() {
        let err = PipelineConfig::from_toml_str(r#"representation = "decimal""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = PipelineConfig::load(Path::new("/nonexistent/natwasm.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/natwasm.toml"));
    }
}
