//! Byte fetching. Everything here is blocking; callers run it on worker threads.

mod download;
mod serial;

pub use download::HttpFetcher;
pub use serial::SerialFetcher;

use crate::errors::Result;
use std::path::Path;
use std::time::Duration;

/// The only way the installer touches the network.
pub trait Fetcher: Send + Sync {
    /// Small resources (manifest, sidecar hash). Whole body in memory.
    fn get_bytes(&self, url: &str, connect_timeout: Duration, read_timeout: Duration)
        -> Result<Vec<u8>>;

    /// Large resources, streamed to `dest`. Returns bytes written.
    fn download_to_path(
        &self,
        url: &str,
        dest: &Path,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<u64>;
}

/// Fetch a small text resource.
pub fn get_text(
    fetcher: &dyn Fetcher,
    url: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<String> {
    let bytes = fetcher.get_bytes(url, connect_timeout, read_timeout)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
