use crate::errors::{Result, RuntimeError};
use crate::net::Fetcher;
use reqwest::blocking::{Client, Response};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Blocking HTTPS fetcher with rustls.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    fn send(&self, url: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<Response> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .user_agent(&self.user_agent)
            .build()?;

        let resp = client.get(url).send()?;
        if !resp.status().is_success() {
            return Err(RuntimeError::Net(format!("GET {url}: HTTP {}", resp.status())));
        }
        Ok(resp)
    }
}

impl Fetcher for HttpFetcher {
    fn get_bytes(
        &self,
        url: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Vec<u8>> {
        debug!(url, "GET");
        let resp = self.send(url, connect_timeout, read_timeout)?;
        let bytes = resp.bytes()?;
        debug!(url, len = bytes.len(), "fetched");
        Ok(bytes.to_vec())
    }

    fn download_to_path(
        &self,
        url: &str,
        dest: &Path,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<u64> {
        let mut resp = self.send(url, connect_timeout, read_timeout)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| RuntimeError::at(parent, e))?;
        }

        let mut out = fs::File::create(dest).map_err(|e| RuntimeError::at(dest, e))?;
        let mut buf = [0u8; 128 * 1024];
        let mut total = 0u64;

        loop {
            let n = resp
                .read(&mut buf)
                .map_err(|e| RuntimeError::Net(format!("read {url}: {e}")))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])
                .map_err(|e| RuntimeError::at(dest, e))?;
            total += n as u64;
        }
        out.flush().map_err(|e| RuntimeError::at(dest, e))?;

        debug!(url, bytes = total, dest = %dest.display(), "downloaded");
        Ok(total)
    }
}
