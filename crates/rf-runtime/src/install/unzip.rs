use crate::errors::{Result, RuntimeError};
use std::fs;
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Whether a zip entry's stored unix mode marks a symlink (`S_IFLNK`).
fn is_symlink_mode(mode: u32) -> bool {
    const S_IFMT: u32 = 0o170000;
    const S_IFLNK: u32 = 0o120000;
    mode & S_IFMT == S_IFLNK
}

/// What landed on disk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: usize,
    pub dirs: usize,
    pub skipped: usize,
}

/// Clean-install `zip_path` into `dest`. Any existing `dest` is removed first;
/// on failure `dest` is removed again so nothing half-written survives.
pub fn unzip_into(zip_path: &Path, dest: &Path) -> Result<ExtractStats> {
    let f = fs::File::open(zip_path).map_err(|e| RuntimeError::at(zip_path, e))?;
    extract_reader(f, dest)
}

pub fn extract_reader<R: Read + Seek>(reader: R, dest: &Path) -> Result<ExtractStats> {
    if dest.exists() {
        fs::remove_dir_all(dest).map_err(|e| RuntimeError::at(dest, e))?;
    }
    fs::create_dir_all(dest).map_err(|e| RuntimeError::at(dest, e))?;

    let res = dest
        .canonicalize()
        .map_err(|e| RuntimeError::at(dest, e))
        .and_then(|root| extract_entries(reader, &root));

    if res.is_err() {
        if let Err(e) = fs::remove_dir_all(dest) {
            warn!(dest = %dest.display(), error = %e, "failed to remove partial extraction");
        }
    }
    res
}

fn extract_entries<R: Read + Seek>(reader: R, root: &Path) -> Result<ExtractStats> {
    let mut archive = ZipArchive::new(reader)?;
    let mut stats = ExtractStats::default();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        let rel = normalize_entry_path(&name)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let outpath = root.join(&rel);

        if entry.unix_mode().is_some_and(is_symlink_mode) {
            warn!(entry = %name, "skipping symlink entry");
            stats.skipped += 1;
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| RuntimeError::at(&outpath, e))?;
            ensure_within(&outpath, root, &name)?;
            stats.dirs += 1;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| RuntimeError::at(parent, e))?;
            ensure_within(parent, root, &name)?;
        }

        let mut out = create_private_file(&outpath)?;
        std::io::copy(&mut entry, &mut out).map_err(|e| RuntimeError::at(&outpath, e))?;
        debug!(entry = %name, "extracted");
        stats.files += 1;
    }

    Ok(stats)
}

/// Lexically resolve an entry name against the root. `a/../b` is fine,
/// anything that climbs above the root or is absolute is a traversal.
pub fn normalize_entry_path(name: &str) -> Result<PathBuf> {
    let unified = name.replace('\\', "/");
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for c in Path::new(&unified).components() {
        match c {
            Component::Prefix(_) | Component::RootDir => {
                return Err(RuntimeError::PathTraversal(name.to_string()));
            }
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(RuntimeError::PathTraversal(name.to_string()));
                }
            }
            Component::CurDir => {}
            Component::Normal(p) => parts.push(p),
        }
    }

    Ok(parts.iter().collect())
}

/// Canonical-form check; catches escapes through pre-existing links.
fn ensure_within(path: &Path, root: &Path, name: &str) -> Result<()> {
    let canon = path.canonicalize().map_err(|e| RuntimeError::at(path, e))?;
    if !canon.starts_with(root) {
        return Err(RuntimeError::PathTraversal(name.to_string()));
    }
    Ok(())
}

/// New files start non-executable; the permission pass grants +x later.
fn create_private_file(path: &Path) -> Result<fs::File> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o644);
    }
    opts.open(path).map_err(|e| RuntimeError::at(path, e))
}
