//! Workspace management for apkshell.
//!
//! Every job gets its own ephemeral build directory under the output
//! directory:
//! ```text
//! {out_dir}/{stem}-{timestamp}-{random}/
//! ├── apk/          # Fully unpacked input package
//! ├── instrument/   # Instrumentor outputs (dex, artifact, source fragment)
//! └── native/       # Staged native project (jni/, libs/ after the build)
//! ```
//!
//! The root is created with exclusive-create semantics, so two jobs started
//! at the same instant against the same output directory never share it.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::{create_tar_gz_from_dir, unpack_zip};
use crate::config::Retention;

/// Represents a job workspace with standardized layout.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Root directory for this job
    pub root: PathBuf,
    /// Unpacked package (apk/)
    pub unpacked_dir: PathBuf,
    /// Instrumentor output directory (instrument/)
    pub instrument_dir: PathBuf,
    /// Native project root (native/), passed as NDK_PROJECT_PATH
    pub project_dir: PathBuf,
}

impl Workspace {
    /// Create a new, uniquely named workspace under `out_dir`.
    ///
    /// # Arguments
    /// * `out_dir` - Directory that receives the workspace (created if missing)
    /// * `label` - Human-readable prefix, usually the input package stem
    pub fn create(out_dir: &Path, label: &str) -> Result<Self> {
        fs::create_dir_all(out_dir)
            .context(format!("Failed to create output directory: {}", out_dir.display()))?;

        let prefix = format!(
            "{}-{}-",
            sanitize_label(label),
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        let root = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(6)
            .tempdir_in(out_dir)
            .context(format!("Failed to create workspace in: {}", out_dir.display()))?
            .keep();

        let workspace = Self::at(root);
        for dir in [
            &workspace.unpacked_dir,
            &workspace.instrument_dir,
            &workspace.project_dir,
        ] {
            fs::create_dir_all(dir)
                .context(format!("Failed to create directory: {}", dir.display()))?;
        }

        info!("Created workspace: {}", workspace.root.display());
        Ok(workspace)
    }

    /// Describe the layout rooted at an existing directory without touching disk.
    pub fn at(root: PathBuf) -> Self {
        Self {
            unpacked_dir: root.join("apk"),
            instrument_dir: root.join("instrument"),
            project_dir: root.join("native"),
            root,
        }
    }

    /// Unpack the input package into `apk/`. Returns the number of files extracted.
    pub fn unpack(&self, archive: &Path) -> Result<usize> {
        let count = unpack_zip(archive, &self.unpacked_dir)?;
        info!(
            "Unpacked {} ({} files) into {}",
            archive.display(),
            count,
            self.unpacked_dir.display()
        );
        Ok(count)
    }

    /// Directory name of the workspace root.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Environment variables describing this workspace to external tools.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("APKSHELL_WORKSPACE".to_string(), self.root.to_string_lossy().to_string()),
            ("APKSHELL_UNPACKED".to_string(), self.unpacked_dir.to_string_lossy().to_string()),
            ("APKSHELL_PROJECT".to_string(), self.project_dir.to_string_lossy().to_string()),
        ]
    }

    /// Remove the workspace directory.
    pub fn cleanup(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .context(format!("Failed to cleanup workspace: {}", self.root.display()))?;
            info!("Cleaned up workspace: {}", self.root.display());
        }
        Ok(())
    }

    /// Apply a retention policy once the job has ended.
    ///
    /// Returns where the workspace (or its snapshot) now lives, if anywhere.
    pub fn retire(&self, policy: Retention, archive_dir: &Path) -> Result<Option<PathBuf>> {
        match policy {
            Retention::Keep => {
                debug!("Keeping workspace: {}", self.root.display());
                Ok(Some(self.root.clone()))
            }
            Retention::Remove => {
                self.cleanup()?;
                Ok(None)
            }
            Retention::Archive => {
                let snapshot = archive_dir.join(format!("{}.workspace.tar.gz", self.name()));
                create_tar_gz_from_dir(&self.root, &snapshot)?;
                info!("Archived workspace to {}", snapshot.display());
                self.cleanup()?;
                Ok(Some(snapshot))
            }
        }
    }
}

/// Keep only characters that are safe in a directory name.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned.chars().take(64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_creation() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::create(temp.path(), "app-release").unwrap();

        assert!(ws.root.exists());
        assert!(ws.unpacked_dir.exists());
        assert!(ws.instrument_dir.exists());
        assert!(ws.project_dir.exists());
        assert!(ws.root.starts_with(temp.path()));
        assert!(ws.name().starts_with("app-release-"));

        assert!(ws.unpacked_dir.ends_with("apk"));
        assert!(ws.instrument_dir.ends_with("instrument"));
        assert!(ws.project_dir.ends_with("native"));
    }

    #[test]
    fn test_concurrent_creation_is_collision_free() {
        let temp = Arc::new(TempDir::new().unwrap());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let temp = Arc::clone(&temp);
                thread::spawn(move || Workspace::create(temp.path(), "same").unwrap().root)
            })
            .collect();

        let roots: HashSet<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(roots.len(), 16);
    }

    #[test]
    fn test_env_vars() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::create(temp.path(), "app").unwrap();
        let vars = ws.env_vars();

        assert!(vars.iter().any(|(k, _)| k == "APKSHELL_WORKSPACE"));
        assert!(vars.iter().any(|(k, v)| k == "APKSHELL_PROJECT" && v.ends_with("native")));
    }

    #[test]
    fn test_retire_policies() {
        let temp = TempDir::new().unwrap();

        let kept = Workspace::create(temp.path(), "keep").unwrap();
        assert_eq!(
            kept.retire(Retention::Keep, temp.path()).unwrap(),
            Some(kept.root.clone())
        );
        assert!(kept.root.exists());

        let removed = Workspace::create(temp.path(), "remove").unwrap();
        assert_eq!(removed.retire(Retention::Remove, temp.path()).unwrap(), None);
        assert!(!removed.root.exists());

        let archived = Workspace::create(temp.path(), "archive").unwrap();
        fs::write(archived.unpacked_dir.join("classes.dex"), "dex").unwrap();
        let snapshot = archived
            .retire(Retention::Archive, temp.path())
            .unwrap()
            .unwrap();
        assert!(snapshot.exists());
        assert!(snapshot.to_string_lossy().ends_with(".workspace.tar.gz"));
        assert!(!archived.root.exists());
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("app-release"), "app-release");
        assert_eq!(sanitize_label("my app!"), "my_app_");
        assert_eq!(sanitize_label(""), "job");
        assert_eq!(sanitize_label(".."), "job");
    }
}
