use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rf_runtime::{
    DesktopPlatform, InstallEvent, InstallOutcome, InstallerConfig, Platform, ProcessSpec,
    RuntimeService,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rf-launcher", version, about = "Provision the RobotForest runtime and run binaries from it")]
struct Cli {
    /// TOML config file; a missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding `lib<name>.so` executables for argv[0] redirection.
    #[arg(long, global = true)]
    native_lib_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download, verify and unpack the runtime (skipped when already stamped).
    Install {
        #[arg(long)]
        force: bool,
    },
    /// Run a binary from the runtime, installing first if needed.
    Run {
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// KEY=VALUE, repeatable.
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },
    /// Show the current install without touching the network.
    Status,
    /// Print the directories in use.
    Paths,
}

fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

fn load_config(path: Option<&Path>) -> Result<InstallerConfig> {
    let mut cfg = match path {
        Some(p) if p.exists() => InstallerConfig::load_from_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        Some(p) => {
            warn!(path = %p.display(), "config file not found, using defaults");
            InstallerConfig::default()
        }
        None => InstallerConfig::default(),
    };
    cfg.apply_env_overrides();
    Ok(cfg)
}

/// Child exit code as a process exit status; signals map to 128+n.
fn to_exit_code(code: i32) -> ExitCode {
    let code = if code < 0 { 128 - code } else { code };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// How `install` reaches a ready runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provision {
    /// Check the manifest; rebuild when `force` or the digest changed.
    Check { force: bool },
    /// Use a stamped install as-is, installing only when there is none.
    Reuse,
}

async fn install(svc: &RuntimeService, mode: Provision) -> Result<PathBuf> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            match ev {
                InstallEvent::Stage(stage) => eprintln!("{stage}"),
                InstallEvent::Ready(path) => eprintln!("ready: {}", path.display()),
                InstallEvent::Failed { kind, message } => eprintln!("failed ({kind}): {message}"),
            }
        }
    });

    let res = match mode {
        Provision::Check { force } => svc.ensure_installed(force, Some(tx)).await,
        Provision::Reuse => svc.ready(Some(tx)).await,
    };
    let _ = printer.await;

    let dir = res.context("runtime install failed")?;
    if dir.outcome == InstallOutcome::AlreadyPresent {
        info!(path = %dir.path.display(), "runtime already installed");
    }
    Ok(dir.path)
}

async fn run_cli(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    let mut platform = DesktopPlatform::new();
    if let Some(dir) = &cli.native_lib_dir {
        platform = platform.with_native_library_dir(dir);
    }
    let platform: Arc<dyn Platform> = Arc::new(platform);
    let svc = RuntimeService::with_http(config, platform.clone())?;

    match cli.command {
        Command::Install { force } => {
            let path = install(&svc, Provision::Check { force }).await?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { workdir, env, argv } => {
            // launching never needs the network once a stamped install exists
            let dir = install(&svc, Provision::Reuse).await?;
            let mut spec = ProcessSpec::in_runtime(&dir, argv);
            if let Some(w) = workdir {
                spec = spec.workdir(w);
            }
            for (k, v) in env {
                spec = spec.env(k, v);
            }

            let result = svc.run(spec).await?;
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            Ok(to_exit_code(result.exit_code))
        }
        Command::Status => {
            match svc.installer().current_install(None) {
                Some(dir) => {
                    println!("installed: {}", dir.path.display());
                    println!("sha256:    {}", dir.sha256);
                }
                None => println!("not installed"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Paths => {
            let installer = svc.installer();
            println!("storage:  {}", platform.private_storage_root().display());
            println!("root:     {}", installer.runtime_root().display());
            println!(
                "install:  {}",
                installer
                    .install_dir_for(&installer.config().default_subdir)
                    .display()
            );
            println!("cache:    {}", platform.cache_dir().display());
            match platform.native_library_dir() {
                Some(d) => println!("native:   {}", d.display()),
                None => println!("native:   (none)"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run_cli(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
