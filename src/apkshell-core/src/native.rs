//! Native build of the staged template project.
//!
//! The toolchain root comes from an environment variable (ANDROID_NDK_HOME by
//! default). It is resolved before any build work starts; the build itself is
//! a single supervised `ndk-build NDK_PROJECT_PATH=<project>` run whose output
//! goes straight to the operator.

use anyhow::Result;
use log::info;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::execution::{run_supervised, ExecutionResult};
use crate::template::TemplateProject;

/// A resolved NDK installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    root: PathBuf,
}

/// Why the toolchain could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolchainError {
    #[error("environment variable {var} is not set; point it at the Android NDK")]
    Unset { var: String },
    #[error("{var}={} does not exist or is not a directory", .path.display())]
    Missing { var: String, path: PathBuf },
}

impl Toolchain {
    /// Resolve the toolchain from environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self, ToolchainError> {
        let value = env::var_os(var)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ToolchainError::Unset { var: var.to_string() })?;
        let root = PathBuf::from(value);
        if !root.is_dir() {
            return Err(ToolchainError::Missing {
                var: var.to_string(),
                path: root,
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the build driver script.
    pub fn ndk_build(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("ndk-build.cmd")
        } else {
            self.root.join("ndk-build")
        }
    }
}

/// Why a native build failed.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("ndk-build timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("ndk-build {0}")]
    Failed(String),
    #[error(transparent)]
    Spawn(#[from] anyhow::Error),
}

/// Runs ndk-build against a staged project.
#[derive(Debug, Clone)]
pub struct NativeBuilder {
    toolchain: Toolchain,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl NativeBuilder {
    pub fn new(toolchain: Toolchain, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            toolchain,
            extra_args,
            timeout,
        }
    }

    /// Arguments passed to ndk-build for `project`.
    pub fn args_for(&self, project: &TemplateProject) -> Vec<String> {
        let mut args = vec![format!("NDK_PROJECT_PATH={}", project.root.display())];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Compile `project`. On success returns the directory holding `<abi>/lib*.so`.
    pub fn build(&self, project: &TemplateProject) -> Result<PathBuf, BuildError> {
        let program = self.toolchain.ndk_build();
        info!("------ Building native code: {} ------", project.root.display());

        let result: ExecutionResult = run_supervised(
            &program,
            &self.args_for(project),
            &project.root,
            &[],
            self.timeout,
        )?;

        info!("------ Native build finished in {:.1}s ------", result.duration.as_secs_f32());

        if result.timed_out {
            return Err(BuildError::TimedOut(self.timeout));
        }
        if !result.success {
            return Err(BuildError::Failed(result.describe()));
        }
        Ok(project.libs_dir())
    }
}
