use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::ErrorKind;

/// Marker meaning "fetch `<url>.sha256` and trust that".
pub const AUTO_HASH: &str = "auto";

/// How the archive digest is to be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedHash {
    /// 64 lowercase hex chars.
    Pinned(String),
    /// Resolve via the sidecar resource.
    Auto,
}

/// A resolved runtime manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub url: String,
    pub sha256: ExpectedHash,
    pub subdir: String,
}

/// Where the manifest came from (for logs / UI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestSource {
    Remote,
    Bundled,
}

/// Orchestrator milestones, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallStage {
    FetchingManifest,
    Downloading,
    Verifying,
    Extracting,
    FixingPermissions,
    Stamping,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallStage::FetchingManifest => "fetching manifest…",
            InstallStage::Downloading => "downloading…",
            InstallStage::Verifying => "verifying…",
            InstallStage::Extracting => "unpacking…",
            InstallStage::FixingPermissions => "fixing permissions…",
            InstallStage::Stamping => "stamping…",
        };
        f.write_str(s)
    }
}

/// Everything the UI layer hears about an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Stage(InstallStage),
    Ready(PathBuf),
    Failed { kind: ErrorKind, message: String },
}

/// How `ensure_installed` reached READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallOutcome {
    AlreadyPresent,
    Installed,
}

/// A ready runtime directory (`<root>/<subdir>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallDirectory {
    pub path: PathBuf,
    pub sha256: String,
    pub outcome: InstallOutcome,
}

impl InstallDirectory {
    pub fn bin_dir(&self) -> PathBuf {
        self.path.join("bin")
    }
}

/// What to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Rooted at an installed runtime: cwd is the runtime dir and its `bin/`
    /// is searched first.
    pub fn in_runtime<I, S>(runtime_dir: &Path, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bin = runtime_dir.join("bin");
        let path = match std::env::var_os("PATH") {
            Some(inherited) if !inherited.is_empty() => {
                let mut parts = vec![bin];
                parts.extend(std::env::split_paths(&inherited));
                std::env::join_paths(parts)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| runtime_dir.join("bin").to_string_lossy().into_owned())
            }
            _ => bin.to_string_lossy().into_owned(),
        };
        Self::new(argv)
            .workdir(runtime_dir)
            .env("PATH", path)
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Captured result of a finished child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_strings_match_milestones() {
        assert_eq!(InstallStage::Downloading.to_string(), "downloading…");
        assert_eq!(InstallStage::Verifying.to_string(), "verifying…");
        assert_eq!(InstallStage::Extracting.to_string(), "unpacking…");
        assert_eq!(
            InstallStage::FixingPermissions.to_string(),
            "fixing permissions…"
        );
    }

    #[test]
    fn in_runtime_puts_bin_first_on_path() {
        let dir = Path::new("/data/rf_runtime/runtime");
        let spec = ProcessSpec::in_runtime(dir, ["box64", "-v"]);

        assert_eq!(spec.argv, vec!["box64", "-v"]);
        assert_eq!(spec.workdir.as_deref(), Some(dir));
        let path = spec.env.get("PATH").unwrap();
        let first = std::env::split_paths(path).next().unwrap();
        assert_eq!(first, dir.join("bin"));
    }
}
