//! Launching binaries from the provisioned runtime.
//!
//! `Exec::run_blocking` spawns one child, captures stdout and stderr as
//! separate streams until EOF, then waits for the exit status. The child
//! is killed and reaped on every early-exit path.

mod redirect;

pub use redirect::{find_redirect, is_executable};

use crate::errors::{Result, RuntimeError};
use crate::platform::Platform;
use crate::types::{ExecutionResult, ProcessSpec};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Exec {
    platform: Arc<dyn Platform>,
    redirect_names: Vec<String>,
}

impl Exec {
    pub fn new(platform: Arc<dyn Platform>, redirect_names: Vec<String>) -> Self {
        Self {
            platform,
            redirect_names,
        }
    }

    /// Absolute native-lib path for a known runtime binary, if one is usable.
    pub fn resolve_redirect(&self, argv0: &str) -> Option<PathBuf> {
        if !self.redirect_names.iter().any(|n| n == argv0) {
            return None;
        }
        let dir = self.platform.native_library_dir()?;
        find_redirect(&dir, argv0)
    }

    /// argv with argv[0] rewritten when a redirect target exists.
    pub fn redirected_argv(&self, argv: &[String]) -> Result<Vec<String>> {
        let (first, rest) = argv.split_first().ok_or(RuntimeError::EmptyArgv)?;
        let program = match self.resolve_redirect(first) {
            Some(p) => {
                debug!(from = %first, to = %p.display(), "redirecting argv[0]");
                p.to_string_lossy().into_owned()
            }
            None => first.clone(),
        };
        let mut out = Vec::with_capacity(argv.len());
        out.push(program);
        out.extend(rest.iter().cloned());
        Ok(out)
    }

    pub fn run_blocking(&self, spec: &ProcessSpec) -> Result<ExecutionResult> {
        let argv = self.redirected_argv(&spec.argv)?;
        let program = &argv[0];

        let mut cmd = Command::new(program);
        cmd.args(&argv[1..])
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }

        info!(program = %program, args = ?&argv[1..], "exec");
        let mut child = cmd.spawn().map_err(|source| RuntimeError::ProcessLaunch {
            program: program.clone(),
            source,
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut child = Reaper::new(child);

        let err_reader = std::thread::Builder::new()
            .name("rf-exec-stderr".into())
            .spawn(move || read_all(stderr))?;
        let out = read_all(stdout)?;
        let err = err_reader
            .join()
            .map_err(|_| RuntimeError::Worker("stderr reader panicked".into()))??;

        let status = child.wait()?;
        let exit_code = exit_code(status);
        debug!(program = %program, exit_code, "exited");

        Ok(ExecutionResult {
            exit_code,
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
        })
    }
}

fn read_all<R: Read>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut s) = stream {
        s.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| -s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Kills and reaps the child unless it was waited on.
struct Reaper {
    child: Child,
    reaped: bool,
}

impl Reaper {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
