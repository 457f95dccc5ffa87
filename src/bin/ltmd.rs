//! LTM Daemon - keeps the active session's usage statistics fresh
//!
//! Discovers the local backend and refreshes the most recently modified
//! session every `poll_interval_secs`, logging the totals.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! ltmd start
//!
//! # Start the daemon (background/daemonized)
//! ltmd start -d
//!
//! # Stop the daemon
//! ltmd stop
//!
//! # Check daemon status
//! ltmd status
//!
//! # Enable debug logging
//! RUST_LOG=ltmd=debug ltmd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ltmd::config::{config_path, Config};
use ltmd::controller::spawn_controller;
use ltmd::discovery::DiscoveryEngine;
use ltmd::poller::spawn_poll_task;
use ltmd::transport::HttpTransportFactory;

/// LTM daemon - token-usage poller for the local language server
#[derive(Parser, Debug)]
#[command(name = "ltmd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("ltm")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("ltmd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("ltmd.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks for a live process with signal 0.
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    false
}

/// Returns the PID of a running daemon, clearing a stale PID file.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let target = libc::pid_t::try_from(pid).context("PID out of range")?;
        // SAFETY: plain kill(2) on a PID read from our own PID file.
        let result = unsafe { libc::kill(target, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {}", pid);
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems (PID {})", pid);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {})", pid);
                eprintln!("Use 'ltmd stop' to stop it first.");
                process::exit(1);
            }

            // Fail before forking so configuration errors reach the terminal.
            let config = Config::load().context("Failed to load configuration")?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {})...", pid);
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {})", pid);
                println!("Log: {}", log_file_path().display());
                if let Some(path) = config_path() {
                    println!("Config: {}", path.display());
                }
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Detaches from the terminal, sending output to the log file.
#[cfg(unix)]
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> Result<()> {
    bail!("Daemon mode is only supported on Unix systems")
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ltmd=info".parse()?)
                .add_directive("ltm_core=info".parse()?)
                .add_directive("ltm_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        poll_interval_secs = config.poll_interval_secs,
        "LTM daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let Some(engine) = DiscoveryEngine::for_current_os().await else {
        bail!("Backend discovery is not supported on this platform");
    };
    info!(target_name = engine.target(), "Discovery engine ready");

    let controller = spawn_controller(Arc::new(engine), Arc::new(HttpTransportFactory));

    if let Err(e) = controller.discover().await {
        warn!(error = %e, "Initial discovery failed, will retry on each poll");
    }

    let poll_handle = spawn_poll_task(controller, config.poll_interval(), cancel_token.clone());

    if let Err(e) = poll_handle.await {
        error!(error = %e, "Poll task failed");
    }

    info!("LTM daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
