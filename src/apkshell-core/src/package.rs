//! Final repackaging of the assembled tree.

use anyhow::Result;
use log::info;
use std::path::{Path, PathBuf};

use crate::archive::{pack_zip, PackOptions};

/// Suffix inserted between the input stem and its extension.
pub const OUTPUT_MARKER: &str = "shelled";
const DEFAULT_EXTENSION: &str = "apk";

/// `<out_dir>/<stem>.shelled.<ext>`, with `apk` when the input has no extension.
pub fn output_path(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string());
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    out_dir.join(format!("{}.{}.{}", stem, OUTPUT_MARKER, ext))
}

/// Why packaging failed.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("output already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Zip `unpacked_root` into `output`.
///
/// An existing `output` is only replaced when `overwrite` is set. The archive
/// is written to a uniquely named temp file beside the destination first, so a
/// failed write never leaves a truncated package under the final name.
pub fn package(
    unpacked_root: &Path,
    output: &Path,
    options: &PackOptions,
    overwrite: bool,
) -> Result<PathBuf, PackageError> {
    if output.exists() && !overwrite {
        return Err(PackageError::AlreadyExists(output.to_path_buf()));
    }

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    // Unique per job; dropped (and removed) if packing fails
    let partial = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|e| anyhow::anyhow!("Failed to create temp file in {}: {}", dir.display(), e))?;

    let entries = pack_zip(unpacked_root, partial.path(), options)?;

    partial.persist(output).map_err(|e| {
        anyhow::anyhow!(
            "Failed to move {} -> {}: {}",
            e.file.path().display(),
            output.display(),
            e.error
        )
    })?;

    info!("Packaged {} entries into {}", entries, output.display());
    Ok(output.to_path_buf())
}
