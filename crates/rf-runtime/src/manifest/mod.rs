pub mod verify;

use crate::errors::{Result, RuntimeError};
use crate::net::{get_text, Fetcher};
use crate::types::{ExpectedHash, Manifest, ManifestSource, AUTO_HASH};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use verify::{
    digests_match, is_sha256_hex, resolve_expected_hash, sha256_file, verify, verify_file,
};

/// Primary remote; kept in the repo so the runtime can change without a new app build.
pub static DEFAULT_MANIFEST_URL: Lazy<String> = Lazy::new(|| {
    "https://raw.githubusercontent.com/jasonsmr/RobotForest/main/scripts/runtime/runtime-manifest.json"
        .to_string()
});

/// Copy shipped inside the binary so installs still work offline.
pub const EMBEDDED_MANIFEST: &str = include_str!("../../assets/manifest.json");

/// Wire shape; every field optional so parsing never fails on omissions.
#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    subdir: Option<String>,
}

/// Parse and normalize a manifest document.
pub fn parse_manifest(text: &str, default_subdir: &str) -> Result<Manifest> {
    let raw: RawManifest = serde_json::from_str(text)?;

    let url = raw.url.unwrap_or_default().trim().to_string();
    if url.is_empty() {
        return Err(RuntimeError::InvalidManifest("missing url".into()));
    }

    let sha = raw.sha256.unwrap_or_default();
    let sha = sha.trim();
    let sha256 = if sha.is_empty() || sha.eq_ignore_ascii_case(AUTO_HASH) {
        ExpectedHash::Auto
    } else if is_sha256_hex(sha) {
        ExpectedHash::Pinned(sha.to_ascii_lowercase())
    } else {
        return Err(RuntimeError::InvalidManifest(format!(
            "sha256 is neither a digest nor \"{AUTO_HASH}\": {sha}"
        )));
    };

    let subdir = raw.subdir.unwrap_or_default();
    let subdir = match subdir.trim() {
        "" => default_subdir.to_string(),
        s => s.to_string(),
    };
    if !is_single_component(&subdir) {
        return Err(RuntimeError::InvalidManifest(format!(
            "subdir must be a plain directory name: {subdir}"
        )));
    }

    Ok(Manifest {
        url,
        sha256,
        subdir,
    })
}

fn is_single_component(s: &str) -> bool {
    let mut comps = Path::new(s).components();
    matches!((comps.next(), comps.next()), (Some(Component::Normal(_)), None))
}

/// The local fallback.
#[derive(Debug, Clone)]
pub enum BundledManifest {
    Embedded(&'static str),
    File(PathBuf),
}

impl BundledManifest {
    fn load(&self) -> Result<String> {
        match self {
            BundledManifest::Embedded(s) => Ok((*s).to_string()),
            BundledManifest::File(p) => {
                std::fs::read_to_string(p).map_err(|e| RuntimeError::at(p, e))
            }
        }
    }
}

impl Default for BundledManifest {
    fn default() -> Self {
        BundledManifest::Embedded(EMBEDDED_MANIFEST)
    }
}

/// Remote first, bundled second.
pub struct ManifestResolver {
    remote_url: String,
    bundled: BundledManifest,
    default_subdir: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    fetcher: Arc<dyn Fetcher>,
}

impl ManifestResolver {
    pub fn new(remote_url: impl Into<String>, bundled: BundledManifest, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            remote_url: remote_url.into(),
            bundled,
            default_subdir: "runtime".into(),
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(20),
            fetcher,
        }
    }

    pub fn default_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.default_subdir = subdir.into();
        self
    }

    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn resolve(&self) -> Result<Manifest> {
        self.resolve_with_source().map(|(m, _)| m)
    }

    /// Fails with `ManifestUnavailable` only when both sources fail.
    pub fn resolve_with_source(&self) -> Result<(Manifest, ManifestSource)> {
        let remote_err = match self.resolve_remote() {
            Ok(m) => {
                info!(url = %m.url, sha256 = ?m.sha256, "using remote manifest");
                return Ok((m, ManifestSource::Remote));
            }
            Err(e) => {
                warn!(url = %self.remote_url, error = %e, "remote manifest failed; trying bundled copy");
                e
            }
        };

        match self.bundled.load().and_then(|t| parse_manifest(&t, &self.default_subdir)) {
            Ok(m) => {
                info!(url = %m.url, sha256 = ?m.sha256, "using bundled manifest");
                Ok((m, ManifestSource::Bundled))
            }
            Err(e) => Err(RuntimeError::ManifestUnavailable {
                remote: remote_err.to_string(),
                bundled: e.to_string(),
            }),
        }
    }

    /// Remote source only, no fallback.
    pub fn resolve_remote(&self) -> Result<Manifest> {
        let text = get_text(
            self.fetcher.as_ref(),
            &self.remote_url,
            self.connect_timeout,
            self.read_timeout,
        )?;
        parse_manifest(&text, &self.default_subdir)
    }
}
