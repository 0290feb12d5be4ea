//! Archive handling for apkshell.
//!
//! Packages are zip containers (apk/jar/zip); workspace snapshots kept for
//! diagnosis are tar.gz. Extraction is validated entry by entry:
//! - Entries escaping the destination are rejected
//! - Absolute paths are rejected
//!
//! Entry *contents* survive an unpack/repack cycle unchanged; container bytes
//! (timestamps, compression levels) may differ.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::Builder;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Options controlling how a directory tree is zipped.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// File extensions (without dot, case-insensitive) stored uncompressed
    pub store_extensions: Vec<String>,
}

impl PackOptions {
    /// Android expects these entries to be mapped directly, so they are never deflated.
    const ALWAYS_STORED: &'static [&'static str] = &["resources.arsc"];

    fn method_for(&self, name: &str) -> CompressionMethod {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        if Self::ALWAYS_STORED.contains(&file_name) {
            return CompressionMethod::Stored;
        }
        let stored = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.store_extensions
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if stored {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        }
    }
}

/// Extract a zip archive into `extract_to`.
///
/// Returns the number of regular files written.
///
/// # Errors
/// Returns error if the archive cannot be opened, is corrupt, or contains an
/// entry whose path would escape the destination.
pub fn unpack_zip(archive_path: &Path, extract_to: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .context(format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .context(format!("Not a valid zip archive: {}", archive_path.display()))?;

    fs::create_dir_all(extract_to)
        .context(format!("Failed to create directory: {}", extract_to.display()))?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .context(format!("Failed to read entry #{} of {}", index, archive_path.display()))?;

        let relative = entry.enclosed_name().ok_or_else(|| {
            anyhow::anyhow!(
                "Archive entry escapes destination: {} (rejected)",
                entry.name()
            )
        })?;
        let dest = extract_to.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&dest)
                .context(format!("Failed to create directory: {}", dest.display()))?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&dest)
            .context(format!("Failed to create file: {}", dest.display()))?;
        io::copy(&mut entry, &mut out)
            .context(format!("Failed to extract entry: {}", entry.name()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(mode & 0o777))?;
        }

        written += 1;
    }

    debug!(
        "Extracted {} files from {} to {}",
        written,
        archive_path.display(),
        extract_to.display()
    );
    Ok(written)
}

/// Create a zip archive from the contents of `source_dir`.
///
/// Archives the contents of the directory, not the directory itself. Entries
/// are written in sorted order; empty directories are kept as directory
/// entries. Returns the number of files written.
pub fn pack_zip(source_dir: &Path, archive_path: &Path, options: &PackOptions) -> Result<usize> {
    let mut files = Vec::new();
    let mut empty_dirs = Vec::new();
    collect_entries(source_dir, source_dir, &mut files, &mut empty_dirs)?;

    let out = File::create(archive_path)
        .context(format!("Failed to create archive: {}", archive_path.display()))?;
    let mut zip = ZipWriter::new(out);

    for dir in &empty_dirs {
        zip.add_directory(entry_name(dir), SimpleFileOptions::default())
            .context(format!("Failed to archive directory: {}", dir.display()))?;
    }

    for relative in &files {
        let name = entry_name(relative);
        let source = source_dir.join(relative);
        let mut entry_options =
            SimpleFileOptions::default().compression_method(options.method_for(&name));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&source)?.permissions().mode();
            entry_options = entry_options.unix_permissions(mode & 0o777);
        }

        zip.start_file(name.as_str(), entry_options)
            .context(format!("Failed to start entry: {}", name))?;
        let mut input = File::open(&source)
            .context(format!("Failed to open file: {}", source.display()))?;
        io::copy(&mut input, &mut zip)
            .context(format!("Failed to archive file: {}", source.display()))?;
    }

    zip.finish().context("Failed to finalize archive")?;

    Ok(files.len())
}

/// Create tar.gz archive from directory contents.
///
/// Archives the contents of the directory, not the directory itself.
pub fn create_tar_gz_from_dir(source_dir: &Path, archive_path: &Path) -> Result<()> {
    let tar_gz = File::create(archive_path)
        .context(format!("Failed to create archive: {}", archive_path.display()))?;
    let enc = GzEncoder::new(tar_gz, Compression::default());
    let mut tar = Builder::new(enc);

    tar.append_dir_all(".", source_dir)
        .context(format!("Failed to archive: {}", source_dir.display()))?;

    tar.into_inner()
        .context("Failed to finalize archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(())
}

/// Walk `dir` recursively, collecting file paths and empty directory paths
/// relative to `root`, sorted.
fn collect_entries(
    root: &Path,
    dir: &Path,
    files: &mut Vec<PathBuf>,
    empty_dirs: &mut Vec<PathBuf>,
) -> Result<()> {
    let mut children: Vec<PathBuf> = fs::read_dir(dir)
        .context(format!("Failed to read directory: {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<_>>()?;
    children.sort();

    if children.is_empty() && dir != root {
        empty_dirs.push(dir.strip_prefix(root)?.to_path_buf());
        return Ok(());
    }

    for child in children {
        if child.is_dir() {
            collect_entries(root, &child, files, empty_dirs)?;
        } else {
            files.push(child.strip_prefix(root)?.to_path_buf());
        }
    }
    Ok(())
}

/// Zip entry names always use forward slashes.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
