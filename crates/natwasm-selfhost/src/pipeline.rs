//! Self-Host Pipeline.
//!
//! ```text
//! Idle → Encoding → CompilerRunning → Decoding → ProgramRunning → Done
//!   └──────────┴─────────────┴──────────────┴──────────────┴──▶ Errored { stage }
//! ```
//!
//! Each stage's result is a hard precondition for the next. Whatever a run
//! produced before failing stays in the [`PipelineReport`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use natwasm_host::{invoke, EntryResult, Invocation, InvokeOptions, Naming, ParamValue};
use natwasm_types::{KeyWarning, Natural};

use crate::canonical::canonicalize;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineStage, StageError};
use crate::image::{decode_compiler_output, image_digest, prefixed_hex, validate_image};

/// File names used when `output_dir` is set.
pub const COMPILER_OUTPUT_FILE: &str = "self_compiler_output.txt";
pub const COMPILER_OUTPUT_HEX_FILE: &str = "self_compiler_output_hex.txt";
pub const PROGRAM_FILE: &str = "program.wasm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Running, or finished when the stage is `Done`.
    At(PipelineStage),
    /// Terminal failure, tagged with the stage that failed.
    Errored { stage: PipelineStage, error: String },
}

impl PipelineState {
    /// The current stage, or the one that failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::At(stage) | Self::Errored { stage, .. } => *stage,
        }
    }

    pub fn is_done(&self) -> bool {
        *self == Self::At(PipelineStage::Done)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Errored { .. })
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::At(PipelineStage::Idle)
    }
}

/// One guest invocation, as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRun {
    /// `P_n(n1=…, …)`
    pub preview: String,
    pub result: String,
    /// Decimal, present when the result decoded as a value.
    pub value: Option<String>,
    pub trace: Vec<String>,
    pub warnings: Vec<KeyWarning>,
    pub elapsed_ms: f64,
}

impl From<&Invocation> for StageRun {
    fn from(invocation: &Invocation) -> Self {
        Self {
            preview: invocation.preview.clone(),
            result: invocation.result.to_string(),
            value: invocation.result.value().map(ToString::to_string),
            trace: invocation.trace.iter().map(ToString::to_string).collect(),
            warnings: invocation.warnings.clone(),
            elapsed_ms: invocation.elapsed.as_secs_f64() * 1000.0,
        }
    }
}

/// Everything a run produced, up to where it stopped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub state: PipelineState,
    /// Decimal value of the canonical source text.
    pub source_value: Option<String>,
    pub source_bytes: Option<usize>,
    pub compiler: Option<StageRun>,
    /// Decimal compiler output.
    pub compiler_output: Option<String>,
    /// `00`-prefixed, even-length hex of the compiler output.
    pub compiler_output_hex: Option<String>,
    pub image_len: Option<usize>,
    pub image_sha256: Option<String>,
    /// Files written under `output_dir`.
    pub written: Vec<PathBuf>,
    pub program: Option<StageRun>,
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
    #[serde(skip)]
    pub error: Option<PipelineError>,
}

impl PipelineReport {
    fn enter(&mut self, stage: PipelineStage) {
        tracing::debug!(%stage, "self-host pipeline");
        self.state = PipelineState::At(stage);
    }

    fn fail(&mut self, source: StageError) {
        let stage = self.state.stage();
        tracing::debug!(%stage, error = %source, "self-host pipeline failed");
        self.state = PipelineState::Errored {
            stage,
            error: source.to_string(),
        };
        self.error = Some(PipelineError { stage, source });
    }

    /// The program's decoded result, if it ran and returned a value.
    pub fn program_value(&self) -> Option<&str> {
        self.program.as_ref()?.value.as_deref()
    }

    /// `Ok(self)` when the run reached `Done`.
    pub fn into_result(self) -> Result<Self, PipelineError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Compiles source text with a guest compiler, then runs what it produced.
#[derive(Debug, Clone, Default)]
pub struct SelfHostPipeline {
    config: PipelineConfig,
}

impl SelfHostPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline. The report's state says how far it got.
    pub fn run(
        &self,
        compiler_image: &[u8],
        source: &str,
        params: &[(String, ParamValue)],
    ) -> PipelineReport {
        let mut report = PipelineReport::default();
        if let Err(err) = self.drive(&mut report, compiler_image, source, params) {
            report.fail(err);
        }
        report
    }

    fn drive(
        &self,
        report: &mut PipelineReport,
        compiler_image: &[u8],
        source: &str,
        params: &[(String, ParamValue)],
    ) -> Result<(), StageError> {
        report.enter(PipelineStage::Encoding);
        let canonical = canonicalize(source)?;
        report.source_value = Some(canonical.value.to_string());
        report.source_bytes = Some(canonical.byte_length);

        report.enter(PipelineStage::CompilerRunning);
        let compiler_options = InvokeOptions {
            naming: Naming::OneBased,
            ..InvokeOptions::default()
        };
        let compiled = invoke(
            self.config.representation,
            compiler_options,
            compiler_image,
            &canonical.compiler_params(),
        )?;
        report.compiler = Some(StageRun::from(&compiled));
        let output = match compiled.result {
            EntryResult::Value(output) => output,
            other => return Err(StageError::NoCompilerOutput(other.to_string())),
        };
        let hex = prefixed_hex(&output);
        report.compiler_output = Some(output.to_string());
        report.compiler_output_hex = Some(hex.clone());

        report.enter(PipelineStage::Decoding);
        let image = decode_compiler_output(&output)?;
        report.image_len = Some(image.len());
        report.image_sha256 = Some(image_digest(&image));
        if let Some(dir) = &self.config.output_dir {
            report.written = write_outputs(dir, &output, &hex, &image)?;
        }
        report.image = Some(image.clone());
        validate_image(&image)?;

        if self.config.no_execution {
            tracing::debug!("execution skipped");
            report.enter(PipelineStage::Done);
            return Ok(());
        }

        report.enter(PipelineStage::ProgramRunning);
        let program_options = InvokeOptions {
            entry: self.config.entry_point.clone(),
            naming: self.config.program_naming,
        };
        let program = invoke(
            self.config.program_representation,
            program_options,
            &image,
            params,
        )?;
        report.program = Some(StageRun::from(&program));

        report.enter(PipelineStage::Done);
        Ok(())
    }
}

fn write_outputs(
    dir: &Path,
    output: &Natural,
    hex: &str,
    image: &[u8],
) -> Result<Vec<PathBuf>, StageError> {
    let write = |name: &str, contents: &[u8]| -> Result<PathBuf, StageError> {
        let path = dir.join(name);
        fs::write(&path, contents).map_err(|e| StageError::Write {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(path)
    };
    fs::create_dir_all(dir).map_err(|e| StageError::Write {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(vec![
        write(COMPILER_OUTPUT_FILE, output.to_string().as_bytes())?,
        write(COMPILER_OUTPUT_HEX_FILE, hex.as_bytes())?,
        write(PROGRAM_FILE, image)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_reports_the_failing_stage() {
        let mut report = PipelineReport::default();
        report.enter(PipelineStage::Decoding);
        report.fail(StageError::NoCompilerOutput("()".into()));
        assert_eq!(report.state.stage(), PipelineStage::Decoding);
        assert!(report.state.is_errored());
        assert_eq!(report.error.as_ref().map(|e| e.stage), Some(PipelineStage::Decoding));
    }

    #[test]
    fn fresh_report_is_idle() {
        let report = PipelineReport::default();
        assert_eq!(report.state, PipelineState::At(PipelineStage::Idle));
        assert!(!report.state.is_done());
    }

    #[test]
    fn state_serializes_with_its_stage() {
        let state = PipelineState::Errored {
            stage: PipelineStage::ProgramRunning,
            error: "boom".into(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["errored"]["stage"], "program_running");
        let done = serde_json::to_value(PipelineState::At(PipelineStage::Done)).unwrap();
        assert_eq!(done["at"], "done");
    }
}
