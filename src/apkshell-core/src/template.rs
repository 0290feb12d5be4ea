//! Native template project: staging and sentinel patching.
//!
//! The skeleton is copied byte-for-byte into the workspace, then one source
//! file is rewritten with a single-pass, line-oriented patcher that knows
//! exactly two sentinels:
//! - the debug sentinel, replaced by a disable marker
//! - the insertion sentinel, replaced by the generated source fragment
//!
//! Lines are handled as raw bytes, so sources in any 8-bit encoding pass
//! through unchanged. `\r\n`, `\n` and a lone `\r` all end a line; output
//! always uses the host terminator.
//!
//! The rewrite goes to a sibling `.tmp` file first and is only moved over the
//! original on [`PendingPatch::commit`]; an abandoned patch removes its temp
//! file and leaves the original untouched.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::SentinelSpec;

/// Line terminator of the build host.
#[cfg(windows)]
pub const HOST_LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const HOST_LINE_ENDING: &str = "\n";

/// The staged copy of the native skeleton.
#[derive(Debug, Clone)]
pub struct TemplateProject {
    /// NDK project root (parent of jni/)
    pub root: PathBuf,
    /// Staged jni/ directory
    pub jni_dir: PathBuf,
}

impl TemplateProject {
    /// Where ndk-build leaves compiled libraries.
    pub fn libs_dir(&self) -> PathBuf {
        self.root.join("libs")
    }
}

/// Copy the skeleton directory into `<project_root>/jni`.
///
/// # Errors
/// Returns error if the skeleton is missing or not a directory, or if any
/// file fails to copy.
pub fn stage_template(skeleton: &Path, project_root: &Path) -> Result<TemplateProject> {
    if !skeleton.is_dir() {
        anyhow::bail!("Template skeleton not found: {}", skeleton.display());
    }

    let jni_dir = project_root.join("jni");
    let copied = copy_dir_recursive(skeleton, &jni_dir)?;
    info!(
        "Staged template {} -> {} ({} files)",
        skeleton.display(),
        jni_dir.display(),
        copied
    );

    Ok(TemplateProject {
        root: project_root.to_path_buf(),
        jni_dir,
    })
}

/// Recursively copy `src` into `dst`, preserving structure. Returns the file count.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<usize> {
    fs::create_dir_all(dst)
        .context(format!("Failed to create directory: {}", dst.display()))?;

    let mut copied = 0;
    for entry in fs::read_dir(src)
        .context(format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to).context(format!(
                "Failed to copy {} -> {}",
                from.display(),
                to.display()
            ))?;
            copied += 1;
        }
    }
    Ok(copied)
}

// ============================================================================
// Sentinel patching
// ============================================================================

/// What to do with a matched sentinel line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentinelAction {
    /// Emit the given marker in place of the line
    DisableDebug(String),
    /// Emit the generated fragment in place of the line
    InsertGenerated,
}

/// An exact-line match paired with its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelDirective {
    pub line: String,
    pub action: SentinelAction,
}

/// Counts of sentinels replaced by one patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PatchSummary {
    pub debug_disabled: usize,
    pub fragments_inserted: usize,
}

/// Single-pass two-sentinel patcher.
#[derive(Debug, Clone)]
pub struct TemplatePatcher {
    directives: Vec<SentinelDirective>,
}

impl TemplatePatcher {
    pub fn new(debug_line: &str, disable_marker: &str, insert_line: &str) -> Self {
        Self {
            directives: vec![
                SentinelDirective {
                    line: debug_line.to_string(),
                    action: SentinelAction::DisableDebug(disable_marker.to_string()),
                },
                SentinelDirective {
                    line: insert_line.to_string(),
                    action: SentinelAction::InsertGenerated,
                },
            ],
        }
    }

    pub fn from_spec(spec: &SentinelSpec) -> Self {
        Self::new(&spec.debug, &spec.disable, &spec.insert)
    }

    fn action_for(&self, line: &[u8]) -> Option<&SentinelAction> {
        self.directives
            .iter()
            .find(|d| d.line.as_bytes() == line)
            .map(|d| &d.action)
    }

    /// Patch `target` in place with the fragment read from `fragment_path`.
    pub fn patch_file(&self, target: &Path, fragment_path: &Path) -> Result<PatchSummary> {
        let fragment = fs::read(fragment_path)
            .context(format!("Failed to read generated source: {}", fragment_path.display()))?;

        let pending = self.prepare(target, split_lines(&fragment).as_slice())?;
        let summary = pending.summary;
        pending.commit()?;

        if summary.fragments_inserted == 0 {
            warn!(
                "No insertion sentinel found in {}; generated code was not spliced",
                target.display()
            );
        }
        info!(
            "Patched {} (debug disabled: {}, fragments inserted: {})",
            target.display(),
            summary.debug_disabled,
            summary.fragments_inserted
        );
        Ok(summary)
    }

    /// Write the patched text to `<target>.tmp` without touching `target`.
    pub fn prepare<L: AsRef<[u8]>>(&self, target: &Path, fragment: &[L]) -> Result<PendingPatch> {
        let temp = temp_path_for(target);
        let input = fs::read(target)
            .context(format!("Failed to read template source: {}", target.display()))?;

        // Guard owns the temp file from here on, so early returns clean it up
        let mut pending = PendingPatch {
            target: target.to_path_buf(),
            temp,
            summary: PatchSummary::default(),
            committed: false,
        };

        let mut writer = BufWriter::new(
            File::create(&pending.temp)
                .context(format!("Failed to create {}", pending.temp.display()))?,
        );

        for line in split_lines(&input) {
            match self.action_for(line) {
                Some(SentinelAction::DisableDebug(marker)) => {
                    write_line(&mut writer, marker.as_bytes())?;
                    pending.summary.debug_disabled += 1;
                }
                Some(SentinelAction::InsertGenerated) => {
                    for generated in fragment {
                        write_line(&mut writer, generated.as_ref())?;
                    }
                    pending.summary.fragments_inserted += 1;
                }
                None => write_line(&mut writer, line)?,
            }
        }

        writer
            .into_inner()
            .map_err(|e| e.into_error())
            .and_then(|file| file.sync_all())
            .context(format!("Failed to flush {}", pending.temp.display()))?;

        debug!("Prepared patch for {} in {}", target.display(), pending.temp.display());
        Ok(pending)
    }
}

/// A fully written patch waiting to replace its target.
#[derive(Debug)]
pub struct PendingPatch {
    target: PathBuf,
    temp: PathBuf,
    summary: PatchSummary,
    committed: bool,
}

impl PendingPatch {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn summary(&self) -> PatchSummary {
        self.summary
    }

    /// Replace the original with the patched file.
    pub fn commit(mut self) -> Result<()> {
        // Windows cannot rename over an existing file
        #[cfg(windows)]
        fs::remove_file(&self.target)
            .context(format!("Failed to remove {}", self.target.display()))?;

        fs::rename(&self.temp, &self.target).context(format!(
            "Failed to move {} over {}",
            self.temp.display(),
            self.target.display()
        ))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingPatch {
    fn drop(&mut self) {
        if !self.committed && self.temp.exists() {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

fn write_line(writer: &mut impl Write, line: &[u8]) -> Result<()> {
    writer.write_all(line)?;
    writer.write_all(HOST_LINE_ENDING.as_bytes())?;
    Ok(())
}

/// Split raw text into lines without their terminators.
///
/// A trailing terminator does not produce an empty last line.
pub fn split_lines(text: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                i += 1;
                if text.get(i) == Some(&b'\n') {
                    i += 1;
                }
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn patcher() -> TemplatePatcher {
        TemplatePatcher::new("DEBUG_ON", "DEBUG_OFF", "INSERT")
    }

    fn lines_of(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .split(HOST_LINE_ENDING)
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_patch_replaces_both_sentinels() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("shell.cpp");
        let fragment = temp.path().join("generated.cpp");
        fs::write(&target, "DEBUG_ON\nfoo\nINSERT\nbar\n").unwrap();
        fs::write(&fragment, "X\nY").unwrap();

        let summary = patcher().patch_file(&target, &fragment).unwrap();

        assert_eq!(
            summary,
            PatchSummary {
                debug_disabled: 1,
                fragments_inserted: 1
            }
        );
        let mut lines = lines_of(&target);
        assert_eq!(lines.pop().as_deref(), Some(""));
        assert_eq!(lines, vec!["DEBUG_OFF", "foo", "X", "Y", "bar"]);
        assert!(!temp.path().join("shell.cpp.tmp").exists());
    }

    #[test]
    fn test_fragment_is_not_rescanned() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("shell.cpp");
        let fragment = temp.path().join("generated.cpp");
        fs::write(&target, "INSERT\n").unwrap();
        // Sentinels inside the fragment are emitted verbatim
        fs::write(&fragment, "DEBUG_ON\nINSERT\n").unwrap();

        patcher().patch_file(&target, &fragment).unwrap();
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            format!("DEBUG_ON{0}INSERT{0}", HOST_LINE_ENDING)
        );
    }

    #[test]
    fn test_crlf_input_is_normalized() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("shell.cpp");
        let fragment = temp.path().join("generated.cpp");
        fs::write(&target, "DEBUG_ON\r\nfoo\r\nINSERT\r\nbar").unwrap();
        fs::write(&fragment, "X\r\nY\r\n").unwrap();

        patcher().patch_file(&target, &fragment).unwrap();
        let expected = ["DEBUG_OFF", "foo", "X", "Y", "bar"]
            .iter()
            .map(|l| format!("{}{}", l, HOST_LINE_ENDING))
            .collect::<String>();
        assert_eq!(fs::read_to_string(&target).unwrap(), expected);
    }

    #[test]
    fn test_cr_only_input_is_split() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("shell.cpp");
        let fragment = temp.path().join("generated.cpp");
        fs::write(&target, "DEBUG_ON\rfoo\rINSERT\rbar\r").unwrap();
        fs::write(&fragment, "X\rY").unwrap();

        let summary = patcher().patch_file(&target, &fragment).unwrap();
        assert_eq!(summary.debug_disabled, 1);
        assert_eq!(summary.fragments_inserted, 1);
        let expected = ["DEBUG_OFF", "foo", "X", "Y", "bar"]
            .iter()
            .map(|l| format!("{}{}", l, HOST_LINE_ENDING))
            .collect::<String>();
        assert_eq!(fs::read_to_string(&target).unwrap(), expected);
    }

    #[test]
    fn test_non_utf8_bytes_pass_through() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("shell.cpp");
        let fragment = temp.path().join("generated.cpp");
        fs::write(&target, b"// caf\xe9\nDEBUG_ON\nINSERT\n").unwrap();
        fs::write(&fragment, b"// \xd6\xd0\xce\xc4\nint x;\n").unwrap();

        patcher().patch_file(&target, &fragment).unwrap();

        let mut expected = Vec::new();
        for line in [&b"// caf\xe9"[..], b"DEBUG_OFF", b"// \xd6\xd0\xce\xc4", b"int x;"] {
            expected.extend_from_slice(line);
            expected.extend_from_slice(HOST_LINE_ENDING.as_bytes());
        }
        assert_eq!(fs::read(&target).unwrap(), expected);
    }

    #[test]
    fn test_split_lines_terminators() {
        let lines = split_lines(b"a\r\nb\nc\rd\r\r\ne");
        assert_eq!(lines, vec![&b"a"[..], b"b", b"c", b"d", b"", b"e"]);
        assert!(split_lines(b"").is_empty());
        assert_eq!(split_lines(b"\n"), vec![&b""[..]]);
    }

    #[test]
    fn test_missing_trailing_newline_adds_no_empty_line() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("a.cpp");
        let fragment = temp.path().join("g.cpp");
        fs::write(&target, "foo\nbar").unwrap();
        fs::write(&fragment, "").unwrap();

        patcher().patch_file(&target, &fragment).unwrap();
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            format!("foo{0}bar{0}", HOST_LINE_ENDING)
        );
    }

    #[test]
    fn test_interrupted_patch_leaves_original_intact() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("shell.cpp");
        let original = b"DEBUG_ON\r\nfoo\nINSERT\nbar".to_vec();
        fs::write(&target, &original).unwrap();

        let pending = patcher()
            .prepare(&target, &["X".to_string(), "Y".to_string()])
            .unwrap();
        let temp_file = pending.temp_path().to_path_buf();
        assert!(temp_file.exists());
        assert_eq!(fs::read(&target).unwrap(), original);

        // Never committed: simulates a crash before the final rename
        drop(pending);
        assert_eq!(fs::read(&target).unwrap(), original);
        assert!(!temp_file.exists());
    }

    #[test]
    fn test_sentinels_must_match_exactly() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("shell.cpp");
        fs::write(&target, "  DEBUG_ON\nINSERT \n").unwrap();

        let pending = patcher().prepare(&target, &["X".to_string()]).unwrap();
        assert_eq!(pending.summary(), PatchSummary::default());
    }

    #[test]
    fn test_stage_template_copies_tree() {
        let temp = TempDir::new().unwrap();
        let skeleton = temp.path().join("skeleton");
        fs::create_dir_all(skeleton.join("shell")).unwrap();
        fs::write(skeleton.join("Android.mk"), "LOCAL_PATH := $(call my-dir)\n").unwrap();
        fs::write(skeleton.join("shell/shell.cpp"), b"\x00binary\xffsafe").unwrap();

        let project = stage_template(&skeleton, &temp.path().join("native")).unwrap();

        assert!(project.jni_dir.join("Android.mk").exists());
        assert_eq!(
            fs::read(project.jni_dir.join("shell/shell.cpp")).unwrap(),
            b"\x00binary\xffsafe"
        );
        assert_eq!(project.libs_dir(), temp.path().join("native/libs"));
    }

    #[test]
    fn test_stage_template_missing_skeleton() {
        let temp = TempDir::new().unwrap();
        let err = stage_template(&temp.path().join("nope"), temp.path()).unwrap_err();
        assert!(err.to_string().contains("Template skeleton not found"));
    }
}
