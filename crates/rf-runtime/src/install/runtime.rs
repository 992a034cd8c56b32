use crate::config::InstallerConfig;
use crate::errors::{Result, RuntimeError};
use crate::manifest::{resolve_expected_hash, verify_file, BundledManifest, ManifestResolver};
use crate::net::Fetcher;
use crate::platform::Platform;
use crate::state::{read_stamp, stamp_matches, write_stamp};
use crate::types::{InstallDirectory, InstallOutcome, InstallStage, Manifest};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::perms::normalize_permissions;
use super::unzip::unzip_into;

const DOWNLOAD_PART: &str = "runtime-download.part";

/// Sequences manifest → download → verify → unzip → chmod → stamp.
///
/// Owns `<storage>/<root_dir_name>/<subdir>` while running. Concurrent
/// calls on the same directory are not serialized here; callers must not
/// overlap them.
pub struct RuntimeInstaller {
    config: InstallerConfig,
    platform: Arc<dyn Platform>,
    fetcher: Arc<dyn Fetcher>,
}

impl RuntimeInstaller {
    pub fn new(config: InstallerConfig, platform: Arc<dyn Platform>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            platform,
            fetcher,
        }
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// `<storage>/<root_dir_name>`
    pub fn runtime_root(&self) -> PathBuf {
        self.platform
            .private_storage_root()
            .join(&self.config.root_dir_name)
    }

    pub fn install_dir_for(&self, subdir: &str) -> PathBuf {
        self.runtime_root().join(subdir)
    }

    /// Stamped install for `subdir` (default subdir if `None`), without
    /// touching the network.
    pub fn current_install(&self, subdir: Option<&str>) -> Option<InstallDirectory> {
        let dir = self.install_dir_for(subdir.unwrap_or(&self.config.default_subdir));
        if !dir.is_dir() {
            return None;
        }
        read_stamp(&dir).map(|sha256| InstallDirectory {
            path: dir,
            sha256,
            outcome: InstallOutcome::AlreadyPresent,
        })
    }

    fn resolver(&self) -> ManifestResolver {
        let bundled = match &self.config.bundled_manifest {
            Some(p) => BundledManifest::File(p.clone()),
            None => BundledManifest::default(),
        };
        ManifestResolver::new(self.config.manifest_url.clone(), bundled, self.fetcher.clone())
            .default_subdir(self.config.default_subdir.clone())
            .timeouts(self.config.connect_timeout(), self.config.read_timeout())
    }

    /// Returns the ready directory. With `force` the stamp short-circuit is
    /// skipped and the directory is always rebuilt.
    pub fn ensure_installed(
        &self,
        force: bool,
        progress: &dyn Fn(InstallStage),
    ) -> Result<InstallDirectory> {
        let stage = |s: InstallStage| {
            info!(stage = %s, "[runtime]");
            progress(s);
        };

        stage(InstallStage::FetchingManifest);
        let installed = if force { None } else { self.current_install(None) };

        let (manifest, expected) = match installed {
            // A stamped install is only replaced when the remote publishes a
            // different digest; an unreachable remote keeps it.
            Some(current) => match self.remote_release() {
                Ok((m, h)) => {
                    let dir = self.install_dir_for(&m.subdir);
                    if stamp_matches(&dir, &h) {
                        info!(dir = %dir.display(), "[runtime] already present");
                        return Ok(InstallDirectory {
                            path: dir,
                            sha256: h,
                            outcome: InstallOutcome::AlreadyPresent,
                        });
                    }
                    info!(sha256 = %h, installed = %current.sha256, "[runtime] new runtime published");
                    (m, h)
                }
                Err(e) => {
                    warn!(error = %e, dir = %current.path.display(), "[runtime] cannot check for updates; keeping stamped install");
                    return Ok(current);
                }
            },
            None => {
                let manifest = self.resolver().resolve()?;
                let expected = resolve_expected_hash(
                    &manifest,
                    self.fetcher.as_ref(),
                    self.config.connect_timeout(),
                    self.config.read_timeout(),
                )?;
                let dir = self.install_dir_for(&manifest.subdir);
                if !force && stamp_matches(&dir, &expected) {
                    info!(dir = %dir.display(), "[runtime] already present");
                    return Ok(InstallDirectory {
                        path: dir,
                        sha256: expected,
                        outcome: InstallOutcome::AlreadyPresent,
                    });
                }
                (manifest, expected)
            }
        };
        let install_dir = self.install_dir_for(&manifest.subdir);

        let part = PartFile(self.platform.cache_dir().join(DOWNLOAD_PART));
        part.clear()?;

        stage(InstallStage::Downloading);
        let bytes = self.fetcher.download_to_path(
            &manifest.url,
            &part.0,
            self.config.connect_timeout(),
            self.config.download_read_timeout(),
        )?;
        info!(url = %manifest.url, bytes, "[runtime] downloaded");

        stage(InstallStage::Verifying);
        let got = verify_file(&part.0, &expected)?;

        stage(InstallStage::Extracting);
        let stats = unzip_into(&part.0, &install_dir)?;
        info!(files = stats.files, dirs = stats.dirs, dir = %install_dir.display(), "[runtime] extracted");
        drop(part);
        self.check_required_binaries(&install_dir)?;

        stage(InstallStage::FixingPermissions);
        let report = normalize_permissions(&install_dir);
        if !report.failures.is_empty() {
            warn!(failed = report.failures.len(), "[runtime] some permissions could not be set");
        }

        stage(InstallStage::Stamping);
        if let Err(e) = write_stamp(&install_dir, &got) {
            discard(&install_dir);
            return Err(e);
        }

        info!(dir = %install_dir.display(), sha256 = %got, "[runtime] ready");
        Ok(InstallDirectory {
            path: install_dir,
            sha256: got,
            outcome: InstallOutcome::Installed,
        })
    }

    fn check_required_binaries(&self, install_dir: &Path) -> Result<()> {
        let bin = install_dir.join("bin");
        for name in &self.config.required_binaries {
            if !bin.join(name).is_file() {
                discard(install_dir);
                return Err(RuntimeError::IncompleteRuntime(format!("bin/{name}")));
            }
        }
        Ok(())
    }

    /// Remote manifest and its digest; the bundled copy is not consulted.
    fn remote_release(&self) -> Result<(Manifest, String)> {
        let manifest = self.resolver().resolve_remote()?;
        let expected = resolve_expected_hash(
            &manifest,
            self.fetcher.as_ref(),
            self.config.connect_timeout(),
            self.config.read_timeout(),
        )?;
        Ok((manifest, expected))
    }
}

/// Unstamped trees never survive a failed install.
fn discard(install_dir: &Path) {
    if let Err(e) = fs::remove_dir_all(install_dir) {
        warn!(dir = %install_dir.display(), error = %e, "failed to remove unfinished runtime");
    }
}

/// Downloaded archive; removed however the install ends.
struct PartFile(PathBuf);

impl PartFile {
    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.0) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::at(&self.0, e)),
        }
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FixedPlatform;
    use crate::state::stamp_path;
    use crate::testutil::{sha256_hex, zip_bytes, MapFetcher};
    use std::sync::Mutex;

    const MANIFEST_URL: &str = "https://host/manifest.json";
    const ARCHIVE_URL: &str = "https://host/rt.zip";

    struct Fixture {
        _tmp: tempfile::TempDir,
        storage: PathBuf,
        fetcher: Arc<MapFetcher>,
        installer: RuntimeInstaller,
    }

    fn fixture(bundled_manifest: Option<&str>) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let storage = tmp.path().join("files");
        let fetcher = Arc::new(MapFetcher::new());

        let mut config = InstallerConfig {
            manifest_url: MANIFEST_URL.into(),
            ..InstallerConfig::default()
        };
        if let Some(text) = bundled_manifest {
            let p = tmp.path().join("bundled.json");
            fs::write(&p, text).unwrap();
            config.bundled_manifest = Some(p);
        }

        let installer = RuntimeInstaller::new(
            config,
            Arc::new(FixedPlatform::new(&storage)),
            fetcher.clone(),
        );
        Fixture {
            _tmp: tmp,
            storage,
            fetcher,
            installer,
        }
    }

    fn runtime_zip() -> Vec<u8> {
        zip_bytes(&[
            ("bin/", b""),
            ("bin/box64", b"\x7fELF box64"),
            ("bin/wine64.sh", b"#!/bin/sh\nexec box64 wine64 \"$@\"\n"),
            ("share/readme.txt", b"runtime"),
        ])
    }

    fn recorder() -> (Arc<Mutex<Vec<InstallStage>>>, impl Fn(InstallStage)) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |s| sink.lock().unwrap().push(s))
    }

    #[test]
    fn auto_manifest_installs_end_to_end() {
        let f = fixture(None);
        let zip = runtime_zip();
        let digest = sha256_hex(&zip);
        f.fetcher.insert(
            MANIFEST_URL,
            r#"{"url":"https://host/rt.zip","sha256":"auto","subdir":"runtime"}"#,
        );
        f.fetcher.insert(ARCHIVE_URL, zip);
        f.fetcher
            .insert("https://host/rt.zip.sha256", format!("{digest}  rt.zip\n"));

        let (seen, sink) = recorder();
        let dir = f.installer.ensure_installed(false, &sink).unwrap();

        let expected_dir = f.storage.join("rf_runtime").join("runtime");
        assert_eq!(dir.path, expected_dir);
        assert_eq!(dir.outcome, InstallOutcome::Installed);
        assert_eq!(dir.sha256, digest);
        assert!(expected_dir.join("bin/box64").is_file());
        assert!(expected_dir.join("bin/wine64.sh").is_file());
        assert_eq!(
            fs::read_to_string(stamp_path(&expected_dir)).unwrap().trim(),
            digest
        );
        #[cfg(unix)]
        {
            use crate::testutil::mode_of;
            assert_eq!(mode_of(&expected_dir.join("bin/box64")) & 0o111, 0o111);
            assert_eq!(mode_of(&expected_dir.join("bin/wine64.sh")) & 0o111, 0o111);
            assert_eq!(mode_of(&expected_dir.join("share")), 0o755);
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                InstallStage::FetchingManifest,
                InstallStage::Downloading,
                InstallStage::Verifying,
                InstallStage::Extracting,
                InstallStage::FixingPermissions,
                InstallStage::Stamping,
            ]
        );
        assert!(!f.storage.join("cache").join(DOWNLOAD_PART).exists());
    }

    #[test]
    fn second_call_short_circuits_offline() {
        let zip = runtime_zip();
        let digest = sha256_hex(&zip);
        let manifest = format!(r#"{{"url":"{ARCHIVE_URL}","sha256":"{digest}"}}"#);
        let f = fixture(Some(&manifest));
        f.fetcher.insert(MANIFEST_URL, manifest.clone());
        f.fetcher.insert(ARCHIVE_URL, zip);

        let first = f.installer.ensure_installed(false, &|_| {}).unwrap();
        assert_eq!(first.outcome, InstallOutcome::Installed);

        f.fetcher.set_offline(true);
        f.fetcher.clear_requests();
        let (seen, sink) = recorder();
        let second = f.installer.ensure_installed(false, &sink).unwrap();

        assert_eq!(second.outcome, InstallOutcome::AlreadyPresent);
        assert_eq!(second.path, first.path);
        assert_eq!(*seen.lock().unwrap(), vec![InstallStage::FetchingManifest]);
        assert!(!f.fetcher.requests().iter().any(|u| u == ARCHIVE_URL));
    }

    #[test]
    fn auto_hash_install_survives_offline_restart() {
        let f = fixture(None);
        let zip = runtime_zip();
        let digest = sha256_hex(&zip);
        f.fetcher.insert(
            MANIFEST_URL,
            r#"{"url":"https://host/rt.zip","sha256":"auto","subdir":"runtime"}"#,
        );
        f.fetcher.insert(ARCHIVE_URL, zip);
        f.fetcher
            .insert("https://host/rt.zip.sha256", format!("{digest}  rt.zip\n"));
        f.installer.ensure_installed(false, &|_| {}).unwrap();

        f.fetcher.set_offline(true);
        f.fetcher.clear_requests();
        let second = f.installer.ensure_installed(false, &|_| {}).unwrap();

        assert_eq!(second.outcome, InstallOutcome::AlreadyPresent);
        assert_eq!(second.sha256, digest);
        // the bundled manifest (different archive) is never consulted
        assert_eq!(f.fetcher.requests(), vec![MANIFEST_URL.to_string()]);
    }

    #[test]
    fn new_remote_digest_replaces_stamped_install() {
        let old = runtime_zip();
        let f = fixture(None);
        f.fetcher.insert(
            MANIFEST_URL,
            format!(r#"{{"url":"{ARCHIVE_URL}","sha256":"{}"}}"#, sha256_hex(&old)),
        );
        f.fetcher.insert(ARCHIVE_URL, old);
        f.installer.ensure_installed(false, &|_| {}).unwrap();

        let new = zip_bytes(&[("bin/box64", b"\x7fELF box64 v2")]);
        let new_digest = sha256_hex(&new);
        f.fetcher.insert(
            MANIFEST_URL,
            format!(r#"{{"url":"https://host/rt2.zip","sha256":"{new_digest}"}}"#),
        );
        f.fetcher.insert("https://host/rt2.zip", new);

        let again = f.installer.ensure_installed(false, &|_| {}).unwrap();
        assert_eq!(again.outcome, InstallOutcome::Installed);
        assert_eq!(read_stamp(&again.path), Some(new_digest));
        assert!(!again.path.join("bin/wine64.sh").exists());
    }

    #[test]
    fn stamp_write_failure_discards_the_tree() {
        // a directory where the stamp's temp file goes makes the write fail
        let zip = zip_bytes(&[("bin/box64", b"x"), (".sha256.tmp/", b"")]);
        let digest = sha256_hex(&zip);
        let f = fixture(None);
        f.fetcher.insert(
            MANIFEST_URL,
            format!(r#"{{"url":"{ARCHIVE_URL}","sha256":"{digest}"}}"#),
        );
        f.fetcher.insert(ARCHIVE_URL, zip);

        let err = f.installer.ensure_installed(false, &|_| {}).unwrap_err();
        assert!(matches!(err, RuntimeError::IoAt { .. }));
        assert!(!f.installer.install_dir_for("runtime").exists());
    }

    #[test]
    fn force_rebuilds_even_with_matching_stamp() {
        let zip = runtime_zip();
        let digest = sha256_hex(&zip);
        let f = fixture(None);
        f.fetcher.insert(
            MANIFEST_URL,
            format!(r#"{{"url":"{ARCHIVE_URL}","sha256":"{digest}"}}"#),
        );
        f.fetcher.insert(ARCHIVE_URL, zip);

        let first = f.installer.ensure_installed(false, &|_| {}).unwrap();
        fs::write(first.path.join("bin/leftover"), b"stale").unwrap();
        f.fetcher.clear_requests();

        let again = f.installer.ensure_installed(true, &|_| {}).unwrap();
        assert_eq!(again.outcome, InstallOutcome::Installed);
        assert!(!again.path.join("bin/leftover").exists());
        assert!(f.fetcher.requests().iter().any(|u| u == ARCHIVE_URL));
        assert_eq!(read_stamp(&again.path), Some(digest));
    }

    #[test]
    fn mismatch_aborts_before_touching_the_install() {
        let zip = runtime_zip();
        let f = fixture(None);
        let wrong = sha256_hex(b"something else");
        f.fetcher.insert(
            MANIFEST_URL,
            format!(r#"{{"url":"{ARCHIVE_URL}","sha256":"{wrong}"}}"#),
        );
        f.fetcher.insert(ARCHIVE_URL, zip.clone());

        let err = f.installer.ensure_installed(false, &|_| {}).unwrap_err();
        match err {
            RuntimeError::ChecksumMismatch { expected, got } => {
                assert_eq!(expected, wrong);
                assert_eq!(got, sha256_hex(&zip));
            }
            e => panic!("unexpected error: {e}"),
        }
        let dir = f.installer.install_dir_for("runtime");
        assert!(!dir.exists());
        assert!(!f.storage.join("cache").join(DOWNLOAD_PART).exists());
    }

    #[test]
    fn unresolvable_checksum_never_downloads() {
        let f = fixture(None);
        f.fetcher
            .insert(MANIFEST_URL, format!(r#"{{"url":"{ARCHIVE_URL}"}}"#));
        f.fetcher.insert(ARCHIVE_URL, runtime_zip());

        let err = f.installer.ensure_installed(false, &|_| {}).unwrap_err();
        assert!(matches!(err, RuntimeError::ChecksumUnresolved(_)));
        assert!(!f.fetcher.requests().iter().any(|u| u == ARCHIVE_URL));
    }

    #[test]
    fn traversal_archive_leaves_no_install_and_no_stamp() {
        let zip = zip_bytes(&[("bin/box64", b"x"), ("../../../escape", b"x")]);
        let digest = sha256_hex(&zip);
        let f = fixture(None);
        f.fetcher.insert(
            MANIFEST_URL,
            format!(r#"{{"url":"{ARCHIVE_URL}","sha256":"{digest}"}}"#),
        );
        f.fetcher.insert(ARCHIVE_URL, zip);

        let err = f.installer.ensure_installed(false, &|_| {}).unwrap_err();
        assert!(matches!(err, RuntimeError::PathTraversal(_)));
        assert!(!f.installer.install_dir_for("runtime").exists());
        assert!(!f.storage.join("escape").exists());
        assert!(!f._tmp.path().join("escape").exists());
        assert!(f.installer.current_install(None).is_none());
    }

    #[test]
    fn archive_without_required_binary_is_incomplete() {
        let zip = zip_bytes(&[("bin/wine64.sh", b"#!/bin/sh\n")]);
        let digest = sha256_hex(&zip);
        let f = fixture(None);
        f.fetcher.insert(
            MANIFEST_URL,
            format!(r#"{{"url":"{ARCHIVE_URL}","sha256":"{digest}"}}"#),
        );
        f.fetcher.insert(ARCHIVE_URL, zip);

        let err = f.installer.ensure_installed(false, &|_| {}).unwrap_err();
        assert!(matches!(err, RuntimeError::IncompleteRuntime(_)));
        assert!(!f.installer.install_dir_for("runtime").exists());
    }

    #[test]
    fn no_manifest_anywhere_is_unavailable() {
        let f = fixture(Some("{}"));
        f.fetcher.set_offline(true);
        let err = f.installer.ensure_installed(false, &|_| {}).unwrap_err();
        assert!(matches!(err, RuntimeError::ManifestUnavailable { .. }));
    }

    #[test]
    fn current_install_reads_stamp_only() {
        let zip = runtime_zip();
        let digest = sha256_hex(&zip);
        let f = fixture(None);
        assert!(f.installer.current_install(None).is_none());

        f.fetcher.insert(
            MANIFEST_URL,
            format!(r#"{{"url":"{ARCHIVE_URL}","sha256":"{digest}"}}"#),
        );
        f.fetcher.insert(ARCHIVE_URL, zip);
        f.installer.ensure_installed(false, &|_| {}).unwrap();

        let cur = f.installer.current_install(Some("runtime")).unwrap();
        assert_eq!(cur.sha256, digest);
        assert_eq!(cur.bin_dir(), f.installer.install_dir_for("runtime").join("bin"));
    }
}
