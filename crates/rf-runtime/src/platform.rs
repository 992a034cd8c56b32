//! Host capabilities the installer and executor need, resolved once at startup.

use dirs::data_dir;
use std::path::{Path, PathBuf};

/// Narrow view of the host: where private data lives and where the
/// platform keeps executable native libraries.
pub trait Platform: Send + Sync {
    /// Application-private storage root (e.g. ~/.local/share/RobotForest).
    fn private_storage_root(&self) -> PathBuf;

    /// Directory the platform permits executing from, if any.
    fn native_library_dir(&self) -> Option<PathBuf>;

    /// Scratch space for downloads.
    fn cache_dir(&self) -> PathBuf {
        self.private_storage_root().join("cache")
    }
}

/// ~/.local/share/RobotForest   (or platform-equivalent)
pub fn robotforest_home() -> PathBuf {
    data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("RobotForest")
}

/// Desktop hosts: data dir for storage, optional explicit native-lib dir.
#[derive(Debug, Clone)]
pub struct DesktopPlatform {
    home: PathBuf,
    native_lib_dir: Option<PathBuf>,
}

impl DesktopPlatform {
    pub fn new() -> Self {
        Self {
            home: robotforest_home(),
            native_lib_dir: None,
        }
    }

    pub fn with_native_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.native_lib_dir = Some(dir.into());
        self
    }
}

impl Default for DesktopPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for DesktopPlatform {
    fn private_storage_root(&self) -> PathBuf {
        self.home.clone()
    }

    fn native_library_dir(&self) -> Option<PathBuf> {
        self.native_lib_dir.clone()
    }
}

/// Explicit paths, for embedding hosts (e.g. an Android shell passing
/// `filesDir` / `nativeLibraryDir`) and tests.
#[derive(Debug, Clone)]
pub struct FixedPlatform {
    pub storage_root: PathBuf,
    pub native_lib_dir: Option<PathBuf>,
}

impl FixedPlatform {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            native_lib_dir: None,
        }
    }

    pub fn with_native_library_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.native_lib_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl Platform for FixedPlatform {
    fn private_storage_root(&self) -> PathBuf {
        self.storage_root.clone()
    }

    fn native_library_dir(&self) -> Option<PathBuf> {
        self.native_lib_dir.clone()
    }
}
