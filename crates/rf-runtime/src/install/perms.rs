//! Permission pass run after extraction.
//!
//! Archive mode bits are not trusted: every directory becomes 0755 and
//! every regular file directly under `bin/` becomes 0755. Failures on a
//! single entry are logged and counted, never fatal.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const DIR_MODE: u32 = 0o755;
pub const EXEC_MODE: u32 = 0o755;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PermissionReport {
    pub directories: usize,
    pub executables: usize,
    pub failures: Vec<PathBuf>,
}

pub fn normalize_permissions(root: &Path) -> PermissionReport {
    let mut report = PermissionReport::default();

    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(e) if e.file_type().is_dir() => {
                if apply(e.path(), DIR_MODE, &mut report) {
                    report.directories += 1;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                warn!(path = %path.display(), error = %e, "cannot walk entry; continuing");
                report.failures.push(path);
            }
        }
    }

    let bin = root.join("bin");
    if !bin.is_dir() {
        debug!(bin = %bin.display(), "no bin directory to mark executable");
        return report;
    }
    for entry in WalkDir::new(&bin).min_depth(1).max_depth(1).follow_links(false) {
        match entry {
            Ok(e) if e.file_type().is_file() => {
                if apply(e.path(), EXEC_MODE, &mut report) {
                    report.executables += 1;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().unwrap_or(bin.as_path()).to_path_buf();
                warn!(path = %path.display(), error = %e, "cannot list bin entry; continuing");
                report.failures.push(path);
            }
        }
    }

    report
}

/// chmod one entry; a failure is recorded in `report`.
fn apply(path: &Path, mode: u32, report: &mut PermissionReport) -> bool {
    match set_mode(path, mode) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), mode = %format!("{mode:o}"), error = %e, "chmod failed; continuing");
            report.failures.push(path.to_path_buf());
            false
        }
    }
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
