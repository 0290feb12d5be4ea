//! Instrumentation stage contract.
//!
//! The instrumentor rewrites the package's executable payload: it consumes the
//! original `classes.dex` and the manifest, and emits
//! - a modified `classes.dex` (loader stubs in place of extracted code)
//! - the extracted-code artifact, placed under `assets/` at runtime
//! - a generated native source fragment, spliced into the template project
//!
//! The rewriting itself lives outside this crate. [`CommandInstrumentor`]
//! drives an external program through environment variables; tests and
//! embedders can supply any other [`Instrumentor`].

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::InstrumentorSpec;
use crate::execution::run_supervised;

pub const OUT_DEX_NAME: &str = "classes.dex";
pub const OUT_ARTIFACT_NAME: &str = "classes.yc";
pub const OUT_SOURCE_NAME: &str = "generated.cpp";

/// Everything the instrumentor is given.
#[derive(Debug, Clone)]
pub struct InstrumentRequest {
    /// Original executable payload
    pub dex: PathBuf,
    /// Package manifest, used to locate the entry class
    pub manifest: PathBuf,
    /// Entry class override; when absent the instrumentor resolves it from the manifest
    pub entry_class: Option<String>,
    /// Directory receiving the three outputs
    pub out_dir: PathBuf,
    /// Extra variables describing the job, such as workspace paths
    pub context: Vec<(String, String)>,
}

impl InstrumentRequest {
    pub fn out_dex(&self) -> PathBuf {
        self.out_dir.join(OUT_DEX_NAME)
    }

    pub fn out_artifact(&self) -> PathBuf {
        self.out_dir.join(OUT_ARTIFACT_NAME)
    }

    pub fn out_source(&self) -> PathBuf {
        self.out_dir.join(OUT_SOURCE_NAME)
    }

    /// Environment handed to an external instrumentor.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("APKSHELL_DEX_IN".to_string(), self.dex.to_string_lossy().to_string()),
            ("APKSHELL_MANIFEST".to_string(), self.manifest.to_string_lossy().to_string()),
            ("APKSHELL_OUT_DEX".to_string(), self.out_dex().to_string_lossy().to_string()),
            ("APKSHELL_OUT_ARTIFACT".to_string(), self.out_artifact().to_string_lossy().to_string()),
            ("APKSHELL_OUT_SOURCE".to_string(), self.out_source().to_string_lossy().to_string()),
        ];
        if let Some(ref class) = self.entry_class {
            vars.push(("APKSHELL_ENTRY_CLASS".to_string(), class.clone()));
        }
        vars.extend(self.context.iter().cloned());
        vars
    }
}

/// Files produced by a successful instrumentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentOutput {
    pub dex: PathBuf,
    pub artifact: PathBuf,
    pub source_fragment: PathBuf,
}

impl InstrumentOutput {
    /// Check that the request's output files all exist.
    pub fn collect(request: &InstrumentRequest) -> Result<Self> {
        let output = Self {
            dex: request.out_dex(),
            artifact: request.out_artifact(),
            source_fragment: request.out_source(),
        };
        for path in [&output.dex, &output.artifact, &output.source_fragment] {
            if !path.is_file() {
                anyhow::bail!("Instrumentor did not produce {}", path.display());
            }
        }
        Ok(output)
    }
}

/// Why an instrumentation attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("instrumentor timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// One-shot payload rewriter. Implementations must not retry internally.
pub trait Instrumentor {
    fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError>;
}

/// Runs an external instrumentor program.
///
/// The request is passed via `APKSHELL_*` environment variables (see
/// [`InstrumentRequest::env_vars`]); exit code 0 with all three outputs present
/// counts as success.
#[derive(Debug, Clone)]
pub struct CommandInstrumentor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandInstrumentor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_spec(spec: &InstrumentorSpec) -> Self {
        Self::new(spec.program.clone(), spec.args.clone(), spec.timeout())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Instrumentor for CommandInstrumentor {
    fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError> {
        info!(
            "Instrumenting {} with {}",
            request.dex.display(),
            self.program.display()
        );

        let result = run_supervised(
            &self.program,
            &self.args,
            &request.out_dir,
            &request.env_vars(),
            self.timeout,
        )?;

        if result.timed_out {
            return Err(InstrumentError::TimedOut(self.timeout));
        }
        if !result.success {
            return Err(anyhow::anyhow!(
                "{} {}",
                self.program.display(),
                result.describe()
            )
            .into());
        }

        InstrumentOutput::collect(request)
            .context("Instrumentor exited successfully but outputs are incomplete")
            .map_err(InstrumentError::from)
    }
}
