//! Shelling configuration.
//!
//! Single source of truth for the `.apkshell.yaml` format, shared by the
//! pipeline and the CLI. Every field has a default so an empty document is a
//! valid configuration.
//!
//! ```yaml
//! template_dir: /opt/apkshell/template/jni
//! patch_target: shell/shell.cpp
//! payload_library: libshell.so
//! toolchain_env: ANDROID_NDK_HOME
//! build_timeout: 1800
//! instrumentor:
//!   program: /opt/apkshell/bin/dex-separator
//!   args: ["--mode", "vmp"]
//!   timeout: 600
//! sentinels:
//!   debug: "#ifdef _SHELL_DEBUG_"
//!   disable: "#if 0"
//!   insert: "//+${generated}"
//! retention:
//!   on_success: remove
//!   on_failure: keep
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Configuration file format (.apkshell.yaml)
// ============================================================================

/// Root structure of `.apkshell.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShellConfig {
    /// Native project skeleton (the `jni/` directory copied into each workspace)
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    /// Source file inside the skeleton that carries the sentinel lines
    #[serde(default = "default_patch_target")]
    pub patch_target: PathBuf,
    /// File name of the compiled protection library
    #[serde(default = "default_payload_library")]
    pub payload_library: String,
    /// Environment variable naming the NDK root
    #[serde(default = "default_toolchain_env")]
    pub toolchain_env: String,
    /// Extra arguments appended to the ndk-build invocation
    #[serde(default)]
    pub build_args: Vec<String>,
    /// Native build timeout in seconds
    #[serde(default = "default_build_timeout")]
    pub build_timeout: u64,
    /// External instrumentor invocation
    #[serde(default)]
    pub instrumentor: InstrumentorSpec,
    /// Template sentinel lines
    #[serde(default)]
    pub sentinels: SentinelSpec,
    /// Workspace retention after the job ends
    #[serde(default)]
    pub retention: RetentionSpec,
    /// Extensions stored without compression when repacking
    #[serde(default = "default_store_extensions")]
    pub store_uncompressed: Vec<String>,
}

/// How the external instrumentor is launched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentorSpec {
    /// Program to run (default: "apkshell-instrument" from PATH)
    #[serde(default = "default_instrumentor_program")]
    pub program: PathBuf,
    /// Fixed arguments passed before anything else
    #[serde(default)]
    pub args: Vec<String>,
    /// Timeout in seconds (default: 600)
    #[serde(default = "default_instrumentor_timeout")]
    pub timeout: u64,
}

/// Exact lines the template patcher looks for.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SentinelSpec {
    #[serde(default = "default_debug_sentinel")]
    pub debug: String,
    #[serde(default = "default_disable_marker")]
    pub disable: String,
    #[serde(default = "default_insert_sentinel")]
    pub insert: String,
}

/// What happens to a workspace once its job has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Retention {
    /// Delete the workspace directory
    Remove,
    /// Leave the workspace on disk
    Keep,
    /// Write `<workspace>.workspace.tar.gz` next to the output, then delete
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetentionSpec {
    #[serde(default = "default_on_success")]
    pub on_success: Retention,
    #[serde(default = "default_on_failure")]
    pub on_failure: Retention,
}

// Default value functions for serde
fn default_template_dir() -> PathBuf {
    PathBuf::from("template/jni")
}

fn default_patch_target() -> PathBuf {
    PathBuf::from("shell/shell.cpp")
}

fn default_payload_library() -> String {
    "libshell.so".to_string()
}

fn default_toolchain_env() -> String {
    "ANDROID_NDK_HOME".to_string()
}

fn default_build_timeout() -> u64 {
    1800
}

fn default_instrumentor_program() -> PathBuf {
    PathBuf::from("apkshell-instrument")
}

fn default_instrumentor_timeout() -> u64 {
    600
}

fn default_debug_sentinel() -> String {
    "#ifdef _SHELL_DEBUG_".to_string()
}

fn default_disable_marker() -> String {
    "#if 0".to_string()
}

fn default_insert_sentinel() -> String {
    "//+${generated}".to_string()
}

fn default_on_success() -> Retention {
    Retention::Remove
}

fn default_on_failure() -> Retention {
    Retention::Keep
}

fn default_store_extensions() -> Vec<String> {
    vec!["so".to_string()]
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            template_dir: default_template_dir(),
            patch_target: default_patch_target(),
            payload_library: default_payload_library(),
            toolchain_env: default_toolchain_env(),
            build_args: Vec::new(),
            build_timeout: default_build_timeout(),
            instrumentor: InstrumentorSpec::default(),
            sentinels: SentinelSpec::default(),
            retention: RetentionSpec::default(),
            store_uncompressed: default_store_extensions(),
        }
    }
}

impl Default for InstrumentorSpec {
    fn default() -> Self {
        Self {
            program: default_instrumentor_program(),
            args: Vec::new(),
            timeout: default_instrumentor_timeout(),
        }
    }
}

impl Default for SentinelSpec {
    fn default() -> Self {
        Self {
            debug: default_debug_sentinel(),
            disable: default_disable_marker(),
            insert: default_insert_sentinel(),
        }
    }
}

impl Default for RetentionSpec {
    fn default() -> Self {
        Self {
            on_success: default_on_success(),
            on_failure: default_on_failure(),
        }
    }
}

impl ShellConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout)
    }
}

impl InstrumentorSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

// ============================================================================
// Parsing functions
// ============================================================================

/// Parse a configuration file from disk.
pub fn parse_config_file(path: &Path) -> Result<ShellConfig> {
    let content = fs::read_to_string(path)
        .context(format!("Failed to read config: {}", path.display()))?;

    parse_config_yaml(&content)
        .context(format!("Failed to parse config: {}", path.display()))
}

/// Parse configuration content from a string.
pub fn parse_config_yaml(content: &str) -> Result<ShellConfig> {
    // An empty document deserializes to unit, not a mapping
    if content.trim().is_empty() {
        return Ok(ShellConfig::default());
    }
    serde_yaml::from_str(content).context("Invalid .apkshell.yaml format")
}
