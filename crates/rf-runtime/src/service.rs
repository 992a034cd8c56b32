//! Async front door used by UI / CLI layers.
//!
//! Construct one `RuntimeService` at startup and clone it where needed.
//! Blocking work runs on tokio's blocking pool; results come back to the
//! awaiting task and progress goes out on an unbounded channel.

use crate::config::InstallerConfig;
use crate::errors::{Result, RuntimeError};
use crate::exec::Exec;
use crate::install::RuntimeInstaller;
use crate::net::{Fetcher, HttpFetcher, SerialFetcher};
use crate::platform::Platform;
use crate::types::{ExecutionResult, InstallDirectory, InstallEvent, ProcessSpec};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::error;

#[derive(Clone)]
pub struct RuntimeService {
    installer: Arc<RuntimeInstaller>,
    exec: Arc<Exec>,
}

impl RuntimeService {
    pub fn new(config: InstallerConfig, platform: Arc<dyn Platform>, fetcher: Arc<dyn Fetcher>) -> Self {
        let exec = Exec::new(platform.clone(), config.redirect_binaries.clone());
        let installer = RuntimeInstaller::new(config, platform, fetcher);
        Self {
            installer: Arc::new(installer),
            exec: Arc::new(exec),
        }
    }

    /// Real network, one outbound connection at a time.
    pub fn with_http(config: InstallerConfig, platform: Arc<dyn Platform>) -> Result<Self> {
        let http: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.user_agent.clone()));
        let serial = SerialFetcher::new(http)?;
        Ok(Self::new(config, platform, Arc::new(serial)))
    }

    pub fn installer(&self) -> &RuntimeInstaller {
        &self.installer
    }

    pub fn exec(&self) -> &Exec {
        &self.exec
    }

    /// Emits `Stage` events, then exactly one `Ready` or `Failed`.
    /// A dropped receiver is ignored.
    pub async fn ensure_installed(
        &self,
        force: bool,
        events: Option<UnboundedSender<InstallEvent>>,
    ) -> Result<InstallDirectory> {
        let installer = self.installer.clone();
        let tx = events.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let progress = |s| {
                if let Some(tx) = &tx {
                    let _ = tx.send(InstallEvent::Stage(s));
                }
            };
            installer.ensure_installed(force, &progress)
        })
        .await;

        let res = match joined {
            Ok(r) => r,
            Err(e) => Err(RuntimeError::Worker(e.to_string())),
        };

        let terminal = match &res {
            Ok(dir) => InstallEvent::Ready(dir.path.clone()),
            Err(e) => {
                error!(error = %e, kind = %e.kind(), "[runtime] install failed");
                InstallEvent::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        if let Some(tx) = events {
            let _ = tx.send(terminal);
        }
        res
    }

    /// The stamped install if there is one, with no network access;
    /// otherwise a normal `ensure_installed(false, ..)`.
    pub async fn ready(
        &self,
        events: Option<UnboundedSender<InstallEvent>>,
    ) -> Result<InstallDirectory> {
        if let Some(dir) = self.installer.current_install(None) {
            if let Some(tx) = events {
                let _ = tx.send(InstallEvent::Ready(dir.path.clone()));
            }
            return Ok(dir);
        }
        self.ensure_installed(false, events).await
    }

    pub async fn run(&self, spec: ProcessSpec) -> Result<ExecutionResult> {
        let exec = self.exec.clone();
        tokio::task::spawn_blocking(move || exec.run_blocking(&spec))
            .await
            .map_err(|e| RuntimeError::Worker(e.to_string()))?
    }
}
