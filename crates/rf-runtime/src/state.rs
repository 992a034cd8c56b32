//! Install stamp: the digest of the last install that fully completed.

use crate::errors::{Result, RuntimeError};
use crate::types::AUTO_HASH;
use std::fs;
use std::path::{Path, PathBuf};

pub const STAMP_FILE: &str = ".sha256";

pub fn stamp_path(install_dir: &Path) -> PathBuf {
    install_dir.join(STAMP_FILE)
}

/// Missing, empty, unreadable or "auto" all read as absent.
pub fn read_stamp(install_dir: &Path) -> Option<String> {
    let raw = fs::read_to_string(stamp_path(install_dir)).ok()?;
    let v = raw.trim().to_ascii_lowercase();
    if v.is_empty() || v == AUTO_HASH {
        return None;
    }
    Some(v)
}

/// True iff a stamp exists and equals `expected` (case-insensitive).
pub fn stamp_matches(install_dir: &Path, expected: &str) -> bool {
    install_dir.is_dir()
        && read_stamp(install_dir)
            .map(|s| s == expected.trim().to_ascii_lowercase())
            .unwrap_or(false)
}

/// Temp file + rename so a crash never leaves a truncated stamp.
pub fn write_stamp(install_dir: &Path, hash: &str) -> Result<()> {
    fs::create_dir_all(install_dir).map_err(|e| RuntimeError::at(install_dir, e))?;
    let tmp = install_dir.join(".sha256.tmp");
    fs::write(&tmp, format!("{}\n", hash.trim().to_ascii_lowercase()))
        .map_err(|e| RuntimeError::at(&tmp, e))?;
    let dest = stamp_path(install_dir);
    fs::rename(&tmp, &dest).map_err(|e| RuntimeError::at(&dest, e))?;
    Ok(())
}
