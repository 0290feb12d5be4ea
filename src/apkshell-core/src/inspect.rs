//! Dry-run view of what shelling would do to a package.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::abi::{select_from_counts, survey, AbiSelection, AbiTarget};
use crate::assemble::{count_sequential_dex, dex_file_name};
use crate::metadata::find_signing_metadata;
use crate::pipeline::{MANIFEST, PAYLOAD_DEX};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Serialize)]
pub struct AbiCount {
    pub abi: AbiTarget,
    /// `None` when `lib/<abi>` does not exist
    pub children: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub input: PathBuf,
    pub files: usize,
    pub has_payload: bool,
    pub has_manifest: bool,
    pub abi_counts: Vec<AbiCount>,
    pub selection: AbiSelection,
    pub existing_dex: u32,
    pub next_dex: String,
    /// Paths relative to the package root
    pub signing_files: Vec<String>,
}

/// Unpack `input` into a scratch directory and report what the pipeline would choose.
pub fn inspect_package(input: &Path) -> Result<Inspection> {
    let scratch = tempfile::Builder::new()
        .prefix("apkshell-inspect-")
        .tempdir()
        .context("Failed to create scratch directory")?;
    let workspace = Workspace::at(scratch.path().to_path_buf());
    let files = workspace.unpack(input)?;
    let root = &workspace.unpacked_dir;

    let counts = survey(root);
    let existing_dex = count_sequential_dex(root);
    let signing_files = find_signing_metadata(root)?
        .iter()
        .map(|p| {
            p.strip_prefix(root)
                .unwrap_or(p.as_path())
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();

    Ok(Inspection {
        input: input.to_path_buf(),
        files,
        has_payload: root.join(PAYLOAD_DEX).is_file(),
        has_manifest: root.join(MANIFEST).is_file(),
        abi_counts: AbiTarget::ALL
            .iter()
            .zip(counts.iter())
            .map(|(abi, children)| AbiCount {
                abi: *abi,
                children: *children,
            })
            .collect(),
        selection: select_from_counts(&counts),
        existing_dex,
        next_dex: dex_file_name(existing_dex + 1),
        signing_files,
    })
}
