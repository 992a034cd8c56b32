//! Installer / executor settings.
//!
//! Every field has a default so an empty (or missing) TOML file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RuntimeError};
use crate::manifest::DEFAULT_MANIFEST_URL;

/// Environment override for the remote manifest URL.
pub const ENV_MANIFEST_URL: &str = "RF_RUNTIME_MANIFEST";
/// Environment override for the bundled manifest file.
pub const ENV_BUNDLED_MANIFEST: &str = "RF_BUNDLED_MANIFEST";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Remote manifest (preferred source).
    pub manifest_url: String,
    /// Local manifest file; `None` uses the copy compiled into the crate.
    pub bundled_manifest: Option<PathBuf>,
    /// Directory under the platform's private storage root.
    pub root_dir_name: String,
    /// Used when the manifest has no (or an empty) `subdir`.
    pub default_subdir: String,
    /// Files that must exist under `bin/` after extraction.
    pub required_binaries: Vec<String>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub download_read_timeout_secs: u64,
    /// argv[0] values eligible for native-library redirection.
    pub redirect_binaries: Vec<String>,
    pub user_agent: String,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.clone(),
            bundled_manifest: None,
            root_dir_name: "rf_runtime".into(),
            default_subdir: "runtime".into(),
            required_binaries: vec!["box64".into()],
            connect_timeout_secs: 15,
            read_timeout_secs: 20,
            download_read_timeout_secs: 600,
            redirect_binaries: ["box64", "box86", "wine", "wine64"]
                .into_iter()
                .map(String::from)
                .collect(),
            user_agent: format!("rf-runtime/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl InstallerConfig {
    /// Load from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RuntimeError::at(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_MANIFEST_URL) {
            if !url.trim().is_empty() {
                self.manifest_url = url.trim().to_string();
            }
        }
        if let Ok(p) = std::env::var(ENV_BUNDLED_MANIFEST) {
            if !p.trim().is_empty() {
                self.bundled_manifest = Some(PathBuf::from(p.trim()));
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn download_read_timeout(&self) -> Duration {
        Duration::from_secs(self.download_read_timeout_secs)
    }
}
