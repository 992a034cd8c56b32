//! rf-runtime
//!
//! Provisions the RobotForest emulation runtime (box64 / wine) into
//! app-private storage and launches binaries from it.
//! - Resolves a manifest (remote, falling back to the bundled copy).
//! - Downloads, verifies sha256 (pinned or `<url>.sha256`), unzips safely.
//! - Fixes permissions and stamps the install so restarts skip the work.
//! - Runs runtime binaries with env / workdir control and stream capture.
//!
//! The pipeline is blocking I/O; `RuntimeService` moves it off the
//! caller's task.

pub mod config;
pub mod errors;
pub mod exec;
pub mod install;
pub mod manifest;
pub mod net;
pub mod platform;
pub mod service;
pub mod state;
pub mod types;

#[cfg(test)]
mod testutil;

pub use config::InstallerConfig;
pub use errors::{ErrorKind, Result, RuntimeError};
pub use exec::Exec;
pub use install::{normalize_permissions, unzip_into, RuntimeInstaller};
pub use manifest::{parse_manifest, BundledManifest, ManifestResolver, DEFAULT_MANIFEST_URL};
pub use net::{Fetcher, HttpFetcher, SerialFetcher};
pub use platform::{DesktopPlatform, FixedPlatform, Platform};
pub use service::RuntimeService;
pub use state::{read_stamp, write_stamp};
pub use types::*;
