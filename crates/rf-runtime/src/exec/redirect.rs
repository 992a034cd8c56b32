use crate::install::set_mode;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Candidate locations for `name` inside the native-library dir. Packagers
/// ship executables there as `lib<name>.so`, so that form comes first.
pub fn candidates(native_dir: &Path, name: &str) -> [PathBuf; 2] {
    [native_dir.join(format!("lib{name}.so")), native_dir.join(name)]
}

/// First candidate that is a file and can be made executable.
pub fn find_redirect(native_dir: &Path, name: &str) -> Option<PathBuf> {
    find_with(native_dir, name, |p| set_mode(p, 0o755), is_executable)
}

fn find_with(
    native_dir: &Path,
    name: &str,
    mark_executable: impl Fn(&Path) -> io::Result<()>,
    executable: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    candidates(native_dir, name).into_iter().find(|p| {
        if !p.is_file() {
            return false;
        }
        if !executable(p) {
            if let Err(e) = mark_executable(p) {
                debug!(path = %p.display(), error = %e, "cannot mark redirect target executable");
            }
        }
        executable(p)
    })
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}
