//! LTM CLI - one-shot token-usage reports for the local backend
//!
//! # Usage
//!
//! ```text
//! ltm discover                 # find the backend and print its port
//! ltm sessions                 # list sessions, newest first
//! ltm session                  # stats for the most recent session
//! ltm session --id <ID>        # stats for a given session
//! ltm daily --days 14          # per-day usage over the last 14 days
//! ltm --json daily             # any command as JSON
//! ```

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ltm_core::{AggregatedStats, DailyModelStats, SessionId, SessionSummary};
use ltm_protocol::method::base_url;
use ltmd::config::{Config, MAX_DAY_WINDOW};
use ltmd::controller::{spawn_controller, ControllerHandle, ServiceError};
use ltmd::discovery::DiscoveryEngine;
use ltmd::transport::HttpTransportFactory;

// ============================================================================
// CLI Arguments
// ============================================================================

/// Token-usage monitor for locally running language-model backends
#[derive(Parser, Debug)]
#[command(name = "ltm", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locate the backend and print its endpoint
    Discover,
    /// List the backend's sessions
    Sessions,
    /// Show usage statistics for a session
    Session {
        /// Session id (defaults to the most recently modified session)
        #[arg(long)]
        id: Option<String>,
        /// Fetch past the cached offsets even if the session looks unchanged
        #[arg(long)]
        force: bool,
    },
    /// Show per-day usage
    Daily {
        /// Number of trailing days (defaults to the configured window)
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ltmd=warn".parse()?)
                .add_directive("ltm_core=warn".parse()?)
                .add_directive("ltm_protocol=warn".parse()?),
        )
        .init();

    let config = Config::load().context("Failed to load configuration")?;
    let engine = DiscoveryEngine::for_current_os()
        .await
        .context("Backend discovery is not supported on this platform")?;
    let controller = spawn_controller(Arc::new(engine), Arc::new(HttpTransportFactory));

    match run(&controller, args.command, args.json, &config).await {
        Ok(()) => Ok(()),
        Err(ServiceError::BackendNotFound) => {
            eprintln!("No running language server backend was found.");
            eprintln!("Start the editor that hosts it, then try again.");
            process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(
    controller: &ControllerHandle,
    command: Command,
    json: bool,
    config: &Config,
) -> Result<(), ServiceError> {
    match command {
        Command::Discover => {
            let handle = controller.discover().await?;
            if json {
                print_json(&serde_json::json!({ "port": handle.port, "url": base_url(handle.port) }));
            } else {
                println!("Backend listening at {}", base_url(handle.port));
            }
        }
        Command::Sessions => {
            let sessions = controller.list_sessions().await?;
            if json {
                print_json(&sessions);
            } else {
                print_sessions(&sessions);
            }
        }
        Command::Session { id: Some(id), force } => {
            let stats = controller.refresh_session(SessionId::new(id), force).await?;
            if json {
                print_json(&stats);
            } else {
                print_stats(&stats);
            }
        }
        Command::Session { id: None, force } => match controller.refresh_active(force).await? {
            Some(report) if json => print_json(&report),
            Some(report) => {
                println!(
                    "{}  {}",
                    report.summary.session_id.short(),
                    report.summary.summary
                );
                print_stats(&report.stats);
            }
            None => eprintln!("The backend has no sessions yet."),
        },
        Command::Daily { days } => {
            let window = days.map_or(config.day_window, |d| d.clamp(1, MAX_DAY_WINDOW));
            let report = controller.daily_report(window).await?;
            if json {
                print_json(&report);
            } else {
                print_daily(&report);
            }
        }
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Failed to encode JSON: {e}"),
    }
}

fn print_sessions(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("No sessions.");
        return;
    }
    println!("{:<10} {:<26} {:>6}  SUMMARY", "ID", "MODIFIED", "STEPS");
    for s in sessions {
        println!(
            "{:<10} {:<26} {:>6}  {}",
            s.session_id.short(),
            s.last_modified,
            s.step_count,
            s.summary
        );
    }
}

fn print_stats(stats: &AggregatedStats) {
    println!(
        "calls {}  input {}  output {}  cache read {}  cache {}%  context {}",
        stats.total_calls,
        stats.total_input,
        stats.total_output,
        stats.total_cache_read,
        stats.cache_efficiency(),
        stats.last_context_size
    );
    for m in &stats.model_breakdown {
        println!(
            "  {:<30} {:>6} calls  {:>8} in  {:>8} out  {:>8} cached",
            m.display_name, m.calls, m.input, m.output, m.cache_read
        );
    }
}

fn print_daily(days: &[DailyModelStats]) {
    for day in days {
        println!(
            "{:<10}  {:>5} calls  {:>8} in  {:>8} out  {:>8} cached  {:>3}%",
            day.date,
            day.totals.calls,
            day.totals.input,
            day.totals.output,
            day.totals.cache_read,
            day.cache_efficiency
        );
        for m in day.models_in_catalog_order() {
            println!(
                "    {:<28} {:>5} calls  {:>8} in  {:>8} out",
                m.display_name, m.calls, m.input, m.output
            );
        }
    }
}
