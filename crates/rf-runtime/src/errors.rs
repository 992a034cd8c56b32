use std::path::PathBuf;
use thiserror::Error;

/// Coarse cause buckets surfaced to the UI on a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Integrity,
    Filesystem,
    Security,
    Process,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Security => "security",
            ErrorKind::Process => "process",
            ErrorKind::Config => "config",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no runtime manifest available (remote: {remote}; bundled: {bundled})")]
    ManifestUnavailable { remote: String, bundled: String },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unable to resolve sha256 (no pinned hash and no usable .sha256 sidecar): {0}")]
    ChecksumUnresolved(String),

    #[error("checksum mismatch: expected {expected} got {got}")]
    ChecksumMismatch { expected: String, got: String },

    #[error("zip path traversal: {0}")]
    PathTraversal(String),

    #[error("runtime incomplete after unzip: missing {0}")]
    IncompleteRuntime(String),

    #[error("failed to launch {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("empty argv")]
    EmptyArgv,

    #[error("network error: {0}")]
    Net(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("I/O error at {}: {source}", path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for RuntimeError {
    fn from(e: reqwest::Error) -> Self {
        RuntimeError::Net(e.to_string())
    }
}

impl RuntimeError {
    /// Attach the offending path to an I/O error.
    pub fn at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuntimeError::IoAt {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::ManifestUnavailable { .. } | RuntimeError::Net(_) => ErrorKind::Network,
            RuntimeError::ChecksumUnresolved(_)
            | RuntimeError::ChecksumMismatch { .. }
            | RuntimeError::IncompleteRuntime(_)
            | RuntimeError::InvalidManifest(_)
            | RuntimeError::Json(_)
            | RuntimeError::Zip(_) => ErrorKind::Integrity,
            RuntimeError::PathTraversal(_) => ErrorKind::Security,
            RuntimeError::ProcessLaunch { .. } | RuntimeError::EmptyArgv => ErrorKind::Process,
            RuntimeError::Config(_) => ErrorKind::Config,
            RuntimeError::Io(_) | RuntimeError::IoAt { .. } | RuntimeError::Worker(_) => {
                ErrorKind::Filesystem
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
