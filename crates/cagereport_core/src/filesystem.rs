use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

pub const REPORT_EXTENSION: &str = "docx";
pub const FINAL_DIR_NAME: &str = "final";
const MAX_VERSIONS: u32 = 10_000;

pub fn partial_report_stem(day: &str) -> String {
    format!("Daily_Report_{day}_partial")
}

pub fn final_report_stem(day: &str) -> String {
    format!("Daily_Report_{day}_FINAL")
}

/// `<dir>/<stem>.<ext>` for version 1, `<dir>/<stem>_v<N>.<ext>` afterwards.
pub fn versioned_path(dir: &Path, stem: &str, extension: &str, version: u32) -> PathBuf {
    if version <= 1 {
        dir.join(format!("{stem}.{extension}"))
    } else {
        dir.join(format!("{stem}_v{version}.{extension}"))
    }
}

/// Whether another process holds `path` open. Probed by renaming the file
/// onto itself, which fails on platforms that lock open files and never
/// truncates or rewrites the content.
pub fn is_locked(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match fs::rename(path, path) {
        Ok(()) => false,
        Err(error) => {
            debug!(path = %path.display(), error = %error, "rename probe failed");
            true
        }
    }
}

/// First versioned path that is free or at least not locked. Existing
/// unlocked files are meant to be overwritten.
pub fn writable_output_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let mut version = 1;
    loop {
        let candidate = versioned_path(dir, stem, extension, version);
        if !is_locked(&candidate) || version >= MAX_VERSIONS {
            if version > 1 {
                warn!(path = %candidate.display(), "canonical output is locked; writing a new version");
            }
            return candidate;
        }
        version += 1;
    }
}

/// First versioned path that does not exist yet.
pub fn unused_output_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let mut version = 1;
    loop {
        let candidate = versioned_path(dir, stem, extension, version);
        if !candidate.exists() || version >= MAX_VERSIONS {
            return candidate;
        }
        version += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Moved,
    Copied,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Moved => "moved",
            Self::Copied => "copied",
        }
    }
}

/// Move `source` to `destination`, copying instead when the move is refused
/// (source held open, cross-device target).
pub fn move_or_copy(source: &Path, destination: &Path) -> Result<TransferKind> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match fs::rename(source, destination) {
        Ok(()) => Ok(TransferKind::Moved),
        Err(error) => {
            warn!(
                source = %source.display(),
                destination = %destination.display(),
                error = %error,
                "move failed; copying instead"
            );
            fs::copy(source, destination).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;
            Ok(TransferKind::Copied)
        }
    }
}
