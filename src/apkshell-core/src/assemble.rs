//! Artifact placement inside the unpacked package.
//!
//! After the native build, the assembler puts every generated or supplied
//! file where the runtime loader expects it:
//! - the protection library in `lib/<abi>/` (ABI chosen by [`crate::abi`])
//! - optional module libraries next to it as `libshell_module_<n>.so`
//! - the extracted-code artifact in `assets/`
//! - the rewritten dex as the next free `classes<N>.dex`

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::abi::AbiTarget;

pub const MODULE_PREFIX: &str = "libshell_module_";
pub const MODULE_SUFFIX: &str = ".so";

/// File name of the dex at 1-based sequential `index`.
///
/// Android names the first dex `classes.dex` and the rest `classes2.dex`,
/// `classes3.dex`, ...
pub fn dex_file_name(index: u32) -> String {
    if index <= 1 {
        "classes.dex".to_string()
    } else {
        format!("classes{}.dex", index)
    }
}

/// Number of sequential dex files present, stopping at the first gap.
pub fn count_sequential_dex(unpacked_root: &Path) -> u32 {
    let mut count = 0;
    while unpacked_root.join(dex_file_name(count + 1)).exists() {
        count += 1;
    }
    count
}

/// Copy `modified_dex` into the package as the next sequential dex.
///
/// Returns the index used and the destination path.
pub fn append_dex(unpacked_root: &Path, modified_dex: &Path) -> Result<(u32, PathBuf)> {
    let existing = count_sequential_dex(unpacked_root);
    let index = existing + 1;
    let dest = unpacked_root.join(dex_file_name(index));

    fs::copy(modified_dex, &dest).context(format!(
        "Failed to copy {} -> {}",
        modified_dex.display(),
        dest.display()
    ))?;

    info!(
        "Appended loader dex as {} ({} existing)",
        dest.display(),
        existing
    );
    Ok((index, dest))
}

/// Copy the protection library for `abi` from the build output into `lib/<abi>/`.
///
/// The library keeps its file name (the part after the last separator of its
/// source path).
pub fn place_payload(
    unpacked_root: &Path,
    abi: AbiTarget,
    build_output: &Path,
    library: &str,
) -> Result<PathBuf> {
    let source = build_output.join(abi.payload_subpath(library));
    if !source.is_file() {
        anyhow::bail!(
            "Protection library not found in build output: {}",
            source.display()
        );
    }

    let lib_dir = abi.lib_dir(unpacked_root);
    fs::create_dir_all(&lib_dir)
        .context(format!("Failed to create {}", lib_dir.display()))?;

    let file_name = library.rsplit(['/', '\\']).next().unwrap_or(library);
    let dest = lib_dir.join(file_name);
    fs::copy(&source, &dest).context(format!(
        "Failed to copy {} -> {}",
        source.display(),
        dest.display()
    ))?;

    info!("Placed protection library at {}", dest.display());
    Ok(dest)
}

/// Copy caller-supplied module libraries into `lib_dir`.
///
/// Blank and non-existent entries are skipped without consuming an index, so
/// the produced names are always `libshell_module_0.so`, `_1`, ... with no gaps.
pub fn place_modules(lib_dir: &Path, modules: &[String]) -> Result<Vec<PathBuf>> {
    let mut placed = Vec::new();

    for raw in modules {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            debug!("Skipping blank module path");
            continue;
        }
        let source = Path::new(trimmed);
        if !source.is_file() {
            warn!("Skipping missing module library: {}", source.display());
            continue;
        }

        if placed.is_empty() {
            fs::create_dir_all(lib_dir)
                .context(format!("Failed to create {}", lib_dir.display()))?;
        }
        let dest = lib_dir.join(format!("{}{}{}", MODULE_PREFIX, placed.len(), MODULE_SUFFIX));
        fs::copy(source, &dest).context(format!(
            "Failed to copy module {} -> {}",
            source.display(),
            dest.display()
        ))?;
        debug!("Placed module {} as {}", source.display(), dest.display());
        placed.push(dest);
    }

    Ok(placed)
}

/// Why the artifact could not be placed.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact destination already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Move the extracted-code artifact into `assets/`, keeping its file name.
pub fn place_artifact(unpacked_root: &Path, artifact: &Path) -> Result<PathBuf, ArtifactError> {
    let assets = unpacked_root.join("assets");
    fs::create_dir_all(&assets)
        .context(format!("Failed to create {}", assets.display()))?;

    let name = artifact
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Artifact path has no file name: {}", artifact.display()))?;
    let dest = assets.join(name);
    if dest.exists() {
        return Err(ArtifactError::AlreadyExists(dest));
    }

    // rename fails across filesystems; fall back to copy + remove
    if fs::rename(artifact, &dest).is_err() {
        fs::copy(artifact, &dest).context(format!(
            "Failed to copy {} -> {}",
            artifact.display(),
            dest.display()
        ))?;
        fs::remove_file(artifact)
            .context(format!("Failed to remove {}", artifact.display()))?;
    }

    info!("Placed extracted artifact at {}", dest.display());
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dex_file_names() {
        assert_eq!(dex_file_name(1), "classes.dex");
        assert_eq!(dex_file_name(2), "classes2.dex");
        assert_eq!(dex_file_name(10), "classes10.dex");
    }

    #[test]
    fn test_append_dex_with_no_existing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("apk");
        fs::create_dir_all(&root).unwrap();
        let modified = temp.path().join("modified.dex");
        fs::write(&modified, "loader").unwrap();

        let (index, dest) = append_dex(&root, &modified).unwrap();
        assert_eq!(index, 1);
        assert_eq!(dest, root.join("classes.dex"));
        assert_eq!(fs::read_to_string(dest).unwrap(), "loader");
    }

    #[test]
    fn test_append_dex_with_one_existing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("apk");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("classes.dex"), "original").unwrap();
        let modified = temp.path().join("modified.dex");
        fs::write(&modified, "loader").unwrap();

        let (index, dest) = append_dex(&root, &modified).unwrap();
        assert_eq!(index, 2);
        assert_eq!(dest, root.join("classes2.dex"));
        assert_eq!(fs::read_to_string(root.join("classes.dex")).unwrap(), "original");
    }

    #[test]
    fn test_append_dex_never_collides() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        for name in ["classes.dex", "classes2.dex", "classes4.dex"] {
            fs::write(root.join(name), name).unwrap();
        }
        assert_eq!(count_sequential_dex(root), 2);

        let modified = temp.path().join("modified.dex");
        fs::write(&modified, "loader").unwrap();
        let (index, _) = append_dex(root, &modified).unwrap();
        assert_eq!(index, 3);
        assert_eq!(fs::read_to_string(root.join("classes4.dex")).unwrap(), "classes4.dex");
    }

    #[test]
    fn test_place_modules_skips_invalid_without_gaps() {
        let temp = TempDir::new().unwrap();
        let real1 = temp.path().join("real1.so");
        let real2 = temp.path().join("real2.so");
        fs::write(&real1, "one").unwrap();
        fs::write(&real2, "two").unwrap();
        let lib_dir = temp.path().join("lib/armeabi-v7a");

        let modules = vec![
            "".to_string(),
            " ".to_string(),
            temp.path().join("missing.so").to_string_lossy().to_string(),
            real1.to_string_lossy().to_string(),
            format!("  {}  ", real2.display()),
        ];
        let placed = place_modules(&lib_dir, &modules).unwrap();

        assert_eq!(
            placed,
            vec![
                lib_dir.join("libshell_module_0.so"),
                lib_dir.join("libshell_module_1.so"),
            ]
        );
        assert_eq!(fs::read_to_string(&placed[0]).unwrap(), "one");
        assert_eq!(fs::read_to_string(&placed[1]).unwrap(), "two");
        assert_eq!(fs::read_dir(&lib_dir).unwrap().count(), 2);
    }

    #[test]
    fn test_place_modules_all_invalid_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let lib_dir = temp.path().join("lib/arm64-v8a");
        let placed = place_modules(&lib_dir, &["".to_string(), "/missing".to_string()]).unwrap();
        assert!(placed.is_empty());
        assert!(!lib_dir.exists());
    }

    #[test]
    fn test_place_payload() {
        let temp = TempDir::new().unwrap();
        let build = temp.path().join("libs");
        fs::create_dir_all(build.join("armeabi-v7a")).unwrap();
        fs::write(build.join("armeabi-v7a/libshell.so"), "v7a-build").unwrap();
        let root = temp.path().join("apk");

        // armeabi shares the armeabi-v7a build
        let dest = place_payload(&root, AbiTarget::Armeabi, &build, "libshell.so").unwrap();
        assert_eq!(dest, root.join("lib/armeabi/libshell.so"));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "v7a-build");

        let err = place_payload(&root, AbiTarget::Arm64V8a, &build, "libshell.so").unwrap_err();
        assert!(err.to_string().contains("not found in build output"));
    }

    #[test]
    fn test_place_artifact() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("apk");
        fs::create_dir_all(&root).unwrap();
        let artifact = temp.path().join("classes.yc");
        fs::write(&artifact, "extracted").unwrap();

        let dest = place_artifact(&root, &artifact).unwrap();
        assert_eq!(dest, root.join("assets/classes.yc"));
        assert!(!artifact.exists());

        fs::write(&artifact, "again").unwrap();
        match place_artifact(&root, &artifact) {
            Err(ArtifactError::AlreadyExists(path)) => assert_eq!(path, dest),
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&dest).unwrap(), "extracted");
    }
}
