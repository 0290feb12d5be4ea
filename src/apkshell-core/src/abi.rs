//! Native ABI targets and the "richest directory wins" selection.

use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// ABIs the protection payload can be placed under, in selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AbiTarget {
    #[serde(rename = "armeabi-v7a")]
    ArmeabiV7a,
    #[serde(rename = "armeabi")]
    Armeabi,
    #[serde(rename = "arm64-v8a")]
    Arm64V8a,
}

impl AbiTarget {
    /// Fixed selection order; ties resolve towards the front.
    pub const ALL: [AbiTarget; 3] = [AbiTarget::ArmeabiV7a, AbiTarget::Armeabi, AbiTarget::Arm64V8a];

    /// Directory name under `lib/`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            AbiTarget::ArmeabiV7a => "armeabi-v7a",
            AbiTarget::Armeabi => "armeabi",
            AbiTarget::Arm64V8a => "arm64-v8a",
        }
    }

    /// ABI whose compiled payload is shipped for this target.
    ///
    /// `armeabi` reuses the `armeabi-v7a` build; no dedicated armeabi payload
    /// is produced.
    pub fn payload_abi(&self) -> AbiTarget {
        match self {
            AbiTarget::ArmeabiV7a | AbiTarget::Armeabi => AbiTarget::ArmeabiV7a,
            AbiTarget::Arm64V8a => AbiTarget::Arm64V8a,
        }
    }

    /// Payload location relative to the native build output directory.
    pub fn payload_subpath(&self, library: &str) -> PathBuf {
        Path::new(self.payload_abi().dir_name()).join(library)
    }

    /// `lib/<abi>` inside an unpacked package.
    pub fn lib_dir(&self, unpacked_root: &Path) -> PathBuf {
        unpacked_root.join("lib").join(self.dir_name())
    }
}

impl fmt::Display for AbiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Result of ABI selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AbiSelection {
    pub target: AbiTarget,
    /// Immediate children of the chosen directory (0 if it does not exist yet)
    pub children: usize,
}

/// Pick the target from per-ABI child counts (`None` = directory absent).
///
/// A strictly larger count replaces the current best, so ties keep the
/// earliest ABI. With no directories at all the first ABI is chosen.
pub fn select_from_counts(counts: &[Option<usize>; 3]) -> AbiSelection {
    let mut best = AbiSelection {
        target: AbiTarget::ALL[0],
        children: 0,
    };
    for (abi, count) in AbiTarget::ALL.iter().zip(counts.iter()) {
        if let Some(count) = *count {
            if count > best.children {
                best = AbiSelection {
                    target: *abi,
                    children: count,
                };
            }
        }
    }
    best
}

/// Count immediate children of every `lib/<abi>` directory under `unpacked_root`.
///
/// Unreadable directories count as empty rather than failing.
pub fn survey(unpacked_root: &Path) -> [Option<usize>; 3] {
    AbiTarget::ALL.map(|abi| {
        let dir = abi.lib_dir(unpacked_root);
        if !dir.is_dir() {
            return None;
        }
        match fs::read_dir(&dir) {
            Ok(entries) => Some(entries.filter(|e| e.is_ok()).count()),
            Err(e) => {
                warn!("Cannot list {}: {} (counting as empty)", dir.display(), e);
                Some(0)
            }
        }
    })
}

/// Choose the ABI directory the protection payload goes into.
pub fn select_abi(unpacked_root: &Path) -> AbiSelection {
    let counts = survey(unpacked_root);
    let selection = select_from_counts(&counts);
    debug!("ABI survey {:?} -> {}", counts, selection.target);
    if selection.target.payload_abi() != selection.target {
        warn!(
            "{} has no dedicated payload; shipping the {} build",
            selection.target,
            selection.target.payload_abi()
        );
    }
    selection
}
