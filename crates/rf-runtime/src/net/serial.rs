use crate::errors::{Result, RuntimeError};
use crate::net::Fetcher;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

type Job = Box<dyn FnOnce(&dyn Fetcher) + Send>;

/// Runs every fetch on one dedicated thread, so at most one outbound
/// connection is open at a time. Callers block until their reply arrives.
pub struct SerialFetcher {
    tx: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SerialFetcher {
    pub fn new(inner: Arc<dyn Fetcher>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name("rf-fetch".into())
            .spawn(move || {
                for job in rx {
                    job(inner.as_ref());
                }
                debug!("fetch worker exiting");
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    fn submit<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Fetcher) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move |fetcher: &dyn Fetcher| {
            // Receiver gone means the caller lost interest.
            let _ = reply_tx.send(f(fetcher));
        });

        self.tx
            .as_ref()
            .ok_or_else(|| RuntimeError::Worker("fetch worker stopped".into()))?
            .send(job)
            .map_err(|_| RuntimeError::Worker("fetch worker stopped".into()))?;

        reply_rx
            .recv()
            .map_err(|_| RuntimeError::Worker("fetch worker dropped the request".into()))?
    }
}

impl Fetcher for SerialFetcher {
    fn get_bytes(
        &self,
        url: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Vec<u8>> {
        let url = url.to_string();
        self.submit(move |f| f.get_bytes(&url, connect_timeout, read_timeout))
    }

    fn download_to_path(
        &self,
        url: &str,
        dest: &Path,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<u64> {
        let url = url.to_string();
        let dest: PathBuf = dest.to_path_buf();
        self.submit(move |f| f.download_to_path(&url, &dest, connect_timeout, read_timeout))
    }
}

impl Drop for SerialFetcher {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
