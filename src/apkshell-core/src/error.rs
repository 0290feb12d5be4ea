//! Typed failures for the shelling pipeline.
//!
//! Helper modules report `anyhow` errors with context; the pipeline maps them
//! onto [`ShellError`] at each stage boundary so callers can branch on the
//! failure kind instead of parsing diagnostic text.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Instrument,
    StageTemplate,
    PatchTemplate,
    NativeBuild,
    Assemble,
    StripMetadata,
    Package,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Instrument => "instrument",
            Stage::StageTemplate => "stage-template",
            Stage::PatchTemplate => "patch-template",
            Stage::NativeBuild => "native-build",
            Stage::Assemble => "assemble",
            Stage::StripMetadata => "strip-metadata",
            Stage::Package => "package",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`crate::pipeline::Shell::run`].
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// Tool misconfiguration (toolchain, skeleton, output directory).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The input package (or something inside it) is unusable.
    #[error("invalid input {}: {message}", .path.display())]
    Input { path: PathBuf, message: String },

    /// A stage failed; the job output must not be consumed.
    #[error("{stage} stage failed: {cause:#}")]
    Stage { stage: Stage, cause: anyhow::Error },

    /// An external process exceeded its time bound and was killed.
    #[error("{stage} stage timed out after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    /// A file the pipeline must create is already present.
    #[error("refusing to overwrite existing file: {}", .path.display())]
    AlreadyExists { path: PathBuf },
}

impl ShellError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ShellError::Configuration { message: message.into() }
    }

    pub fn input(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ShellError::Input {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn stage(stage: Stage, cause: impl Into<anyhow::Error>) -> Self {
        ShellError::Stage {
            stage,
            cause: cause.into(),
        }
    }

    /// Stage the error is attributed to, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            ShellError::Stage { stage, .. } | ShellError::Timeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Short machine-readable kind, used by the CLI and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ShellError::Configuration { .. } => "configuration",
            ShellError::Input { .. } => "input",
            ShellError::Stage { .. } => "stage",
            ShellError::Timeout { .. } => "timeout",
            ShellError::AlreadyExists { .. } => "already-exists",
        }
    }
}

/// Attach a stage to an `anyhow` result.
pub(crate) trait StageResultExt<T> {
    fn in_stage(self, stage: Stage) -> Result<T, ShellError>;
}

impl<T> StageResultExt<T> for anyhow::Result<T> {
    fn in_stage(self, stage: Stage) -> Result<T, ShellError> {
        self.map_err(|e| ShellError::stage(stage, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display_includes_chain() {
        let cause = anyhow::anyhow!("ndk-build exited with code 2").context("compile failed");
        let err = ShellError::stage(Stage::NativeBuild, cause);
        let msg = err.to_string();
        assert!(msg.starts_with("native-build stage failed"));
        assert!(msg.contains("compile failed"));
        assert!(msg.contains("exited with code 2"));
        assert_eq!(err.failed_stage(), Some(Stage::NativeBuild));
    }

    #[test]
    fn test_kinds_are_distinct() {
        let timeout = ShellError::Timeout {
            stage: Stage::NativeBuild,
            after: Duration::from_secs(5),
        };
        let exists = ShellError::AlreadyExists {
            path: PathBuf::from("/out/app.shelled.apk"),
        };
        assert_eq!(timeout.kind(), "timeout");
        assert_eq!(exists.kind(), "already-exists");
        assert_eq!(ShellError::configuration("x").kind(), "configuration");
        assert_eq!(ShellError::input("/a.apk", "corrupt").kind(), "input");
        assert!(timeout.to_string().contains("timed out after 5s"));
    }
}
