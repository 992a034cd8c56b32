//! Content digests for downloaded archives.

use crate::errors::{Result, RuntimeError};
use crate::net::{get_text, Fetcher};
use crate::types::{ExpectedHash, Manifest};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Suffix of the sidecar checksum resource.
pub const SIDECAR_SUFFIX: &str = ".sha256";

pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Case-insensitive hex equality.
pub fn digests_match(got: &str, expected: &str) -> bool {
    got.trim().eq_ignore_ascii_case(expected.trim())
}

/// `true` iff `data` hashes to `expected`.
pub fn verify(data: &[u8], expected: &str) -> bool {
    digests_match(&hex::encode(Sha256::digest(data)), expected)
}

/// Pinned hash as-is; "auto" goes to `<url>.sha256`.
pub fn resolve_expected_hash(
    manifest: &Manifest,
    fetcher: &dyn Fetcher,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<String> {
    match &manifest.sha256 {
        ExpectedHash::Pinned(h) => Ok(h.to_ascii_lowercase()),
        ExpectedHash::Auto => {
            let url = format!("{}{}", manifest.url, SIDECAR_SUFFIX);
            info!(%url, "fetching sha256 sidecar");
            let text = get_text(fetcher, &url, connect_timeout, read_timeout)
                .map_err(|e| RuntimeError::ChecksumUnresolved(format!("{url}: {e}")))?;
            parse_sidecar(&text)
        }
    }
}

/// First whitespace-delimited token, e.g. `abcd…ef  rt.zip`.
pub fn parse_sidecar(text: &str) -> Result<String> {
    let token = text
        .split_whitespace()
        .next()
        .ok_or_else(|| RuntimeError::ChecksumUnresolved("empty sidecar".into()))?;
    if !is_sha256_hex(token) {
        return Err(RuntimeError::ChecksumUnresolved(format!(
            "sidecar token is not a sha256 digest: {token}"
        )));
    }
    Ok(token.to_ascii_lowercase())
}

pub fn sha256_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let f = fs::File::open(path).map_err(|e| RuntimeError::at(path, e))?;
    sha256_reader(f).map_err(|e| RuntimeError::at(path, e))
}

/// Hash the file and compare. Returns the (lowercase) digest on success.
pub fn verify_file(path: &Path, expected: &str) -> Result<String> {
    let got = sha256_file(path)?;
    if !digests_match(&got, expected) {
        return Err(RuntimeError::ChecksumMismatch {
            expected: expected.trim().to_ascii_lowercase(),
            got,
        });
    }
    debug!(digest = %got, "checksum OK");
    Ok(got)
}
