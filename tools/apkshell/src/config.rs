//! Configuration loading for the apkshell tool.
//!
//! Loads configuration from:
//! 1. An explicit `--config` path, or `.apkshell.yaml` in the current
//!    directory, or `~/.apkshell.yaml`
//! 2. Environment variables (override file config)
//!
//! Relative paths in a config file are resolved against the file's directory.

use anyhow::{Context, Result};
use apkshell_core::{parse_config_file, ShellConfig};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".apkshell.yaml";

/// Effective configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ShellConfig,
    pub source: Option<PathBuf>,
}

/// Load configuration and apply environment overrides.
///
/// Environment variables override file settings:
/// - APKSHELL_TEMPLATE_DIR - Native skeleton directory
/// - APKSHELL_INSTRUMENTOR - Instrumentor program
/// - APKSHELL_BUILD_TIMEOUT - ndk-build timeout in seconds
/// - APKSHELL_TOOLCHAIN_ENV - Name of the variable holding the NDK root
///
/// # Errors
/// Returns error if an explicit config path is missing, a config file is
/// invalid, or an override has the wrong type.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let source = match explicit {
        Some(path) => {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => find_config_file(),
    };

    let mut config = match source {
        Some(ref path) => {
            let mut config = parse_config_file(path)?;
            if let Some(base) = path.parent() {
                resolve_relative(&mut config, base);
            }
            config
        }
        None => ShellConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    Ok(LoadedConfig { config, source })
}

/// Find `.apkshell.yaml` in standard locations
fn find_config_file() -> Option<PathBuf> {
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    if let Ok(home) = env::var("HOME") {
        let home_config = PathBuf::from(home).join(CONFIG_FILE_NAME);
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

fn resolve_relative(config: &mut ShellConfig, base: &Path) {
    if config.template_dir.is_relative() && !base.as_os_str().is_empty() {
        config.template_dir = base.join(&config.template_dir);
    }
    // Bare program names are looked up on PATH
    let program = &config.instrumentor.program;
    if program.is_relative() && program.components().count() > 1 && !base.as_os_str().is_empty() {
        config.instrumentor.program = base.join(program);
    }
}

fn apply_env_overrides(config: &mut ShellConfig) -> Result<()> {
    if let Ok(dir) = env::var("APKSHELL_TEMPLATE_DIR") {
        config.template_dir = PathBuf::from(dir);
    }

    if let Ok(program) = env::var("APKSHELL_INSTRUMENTOR") {
        config.instrumentor.program = PathBuf::from(program);
    }

    if let Ok(timeout) = env::var("APKSHELL_BUILD_TIMEOUT") {
        config.build_timeout = timeout
            .parse()
            .context("Invalid APKSHELL_BUILD_TIMEOUT value (must be seconds)")?;
    }

    if let Ok(var) = env::var("APKSHELL_TOOLCHAIN_ENV") {
        config.toolchain_env = var;
    }

    Ok(())
}

/// Write a sample `.apkshell.yaml` with every setting spelled out.
pub fn create_sample(path: &Path) -> Result<()> {
    let sample = ShellConfig::default();
    let yaml = serde_yaml::to_string(&sample).context("Failed to serialize sample config")?;

    let commented = format!(
        "# apkshell configuration\n\
         #\n\
         # Relative paths are resolved against this file's directory.\n\
         # Environment variables can override these settings:\n\
         #   APKSHELL_TEMPLATE_DIR  - Native skeleton directory\n\
         #   APKSHELL_INSTRUMENTOR  - Instrumentor program\n\
         #   APKSHELL_BUILD_TIMEOUT - ndk-build timeout in seconds\n\
         #   APKSHELL_TOOLCHAIN_ENV - Variable holding the NDK root\n\
         #\n\
         # retention values: remove, keep, archive\n\
         #\n\
         {}",
        yaml
    );

    fs::write(path, commented)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apkshell_core::{parse_config_yaml, Retention};
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_resolves_relative_paths() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shell.yaml");
        fs::write(
            &path,
            "template_dir: skel/jni\ninstrumentor:\n  program: bin/separator\nretention:\n  on_success: archive\n",
        )
        .unwrap();

        let loaded = load(Some(&path)).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.template_dir, temp.path().join("skel/jni"));
        assert_eq!(loaded.config.instrumentor.program, temp.path().join("bin/separator"));
        assert_eq!(loaded.config.retention.on_success, Retention::Archive);
    }

    #[test]
    fn test_bare_program_stays_on_path() {
        let mut config = parse_config_yaml("instrumentor:\n  program: separator\n").unwrap();
        resolve_relative(&mut config, Path::new("/etc/apkshell"));
        assert_eq!(config.instrumentor.program, PathBuf::from("separator"));
        assert_eq!(config.template_dir, PathBuf::from("/etc/apkshell/template/jni"));
    }

    #[test]
    fn test_missing_explicit_config() {
        let err = load(Some(Path::new("/no/such/.apkshell.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_env_overrides() {
        // SAFETY: Tests run sequentially, no concurrent env access
        unsafe {
            env::set_var("APKSHELL_TEMPLATE_DIR", "/opt/skel");
            env::set_var("APKSHELL_BUILD_TIMEOUT", "42");
            env::set_var("APKSHELL_TOOLCHAIN_ENV", "MY_NDK");
        }

        let mut config = ShellConfig::default();
        let result = apply_env_overrides(&mut config);

        // SAFETY: Tests run sequentially, no concurrent env access
        unsafe {
            env::remove_var("APKSHELL_TEMPLATE_DIR");
            env::remove_var("APKSHELL_BUILD_TIMEOUT");
            env::remove_var("APKSHELL_TOOLCHAIN_ENV");
        }

        result.unwrap();
        assert_eq!(config.template_dir, PathBuf::from("/opt/skel"));
        assert_eq!(config.build_timeout, 42);
        assert_eq!(config.toolchain_env, "MY_NDK");
    }

    #[test]
    fn test_create_sample_round_trips() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        create_sample(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# apkshell configuration"));
        assert!(content.contains("APKSHELL_TEMPLATE_DIR"));

        let config = parse_config_yaml(&content).unwrap();
        assert_eq!(config.sentinels.insert, "//+${generated}");
        assert_eq!(config.retention.on_failure, Retention::Keep);
    }
}
