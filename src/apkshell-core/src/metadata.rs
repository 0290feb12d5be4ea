//! Removal of the original signing metadata.
//!
//! A rewritten package can no longer carry its original signature. Only the
//! signature files are removed: other `META-INF` content (service loaders,
//! version files) stays, and the directory itself is kept for re-signing tools.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_DIR: &str = "META-INF";

/// Files that make up a jar/apk v1 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFile {
    /// Digest manifest (`MANIFEST.MF`)
    Manifest,
    /// Signature file (`CERT.SF`)
    SignatureBlock,
    /// RSA signature block
    Rsa,
    /// DSA signature block
    Dsa,
    /// Elliptic-curve signature block
    Ec,
}

impl SignatureFile {
    pub const ALL: [SignatureFile; 5] = [
        SignatureFile::Manifest,
        SignatureFile::SignatureBlock,
        SignatureFile::Rsa,
        SignatureFile::Dsa,
        SignatureFile::Ec,
    ];

    /// Upper-case suffix identifying the file kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            SignatureFile::Manifest => ".MF",
            SignatureFile::SignatureBlock => ".SF",
            SignatureFile::Rsa => ".RSA",
            SignatureFile::Dsa => ".DSA",
            SignatureFile::Ec => ".EC",
        }
    }

    /// Classify a file name, ignoring case.
    pub fn classify(name: &str) -> Option<SignatureFile> {
        let upper = name.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| upper.ends_with(kind.suffix()))
    }
}

/// Signature files directly inside `<unpacked_root>/META-INF`, sorted.
///
/// A missing directory yields an empty list. Subdirectories are not descended into.
pub fn find_signing_metadata(unpacked_root: &Path) -> Result<Vec<PathBuf>> {
    let meta_dir = unpacked_root.join(METADATA_DIR);
    if !meta_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(&meta_dir)
        .context(format!("Failed to read directory: {}", meta_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if SignatureFile::classify(&entry.file_name().to_string_lossy()).is_some() {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Delete the signature files found by [`find_signing_metadata`].
///
/// The `META-INF` directory itself is never removed. Returns the removed paths.
pub fn strip_signing_metadata(unpacked_root: &Path) -> Result<Vec<PathBuf>> {
    let meta_dir = unpacked_root.join(METADATA_DIR);
    if !meta_dir.is_dir() {
        debug!("No {} directory; nothing to strip", METADATA_DIR);
        return Ok(Vec::new());
    }

    let removed = find_signing_metadata(unpacked_root)?;
    for path in &removed {
        fs::remove_file(path).context(format!("Failed to remove {}", path.display()))?;
        debug!("Removed signing file {}", path.display());
    }

    info!(
        "Stripped {} signing file(s) from {}",
        removed.len(),
        meta_dir.display()
    );
    Ok(removed)
}
