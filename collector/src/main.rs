mod app;
mod ingest;
mod model;
mod pipeline;
mod store;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use collector_core::{telemetry, Config};
use pipeline::RunReport;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, warn};

#[derive(Parser)]
#[clap(name = "tfl-collector")]
#[clap(about = "Point-in-time TfL line status and arrivals snapshot collector", version)]
struct Cli {
    /// Config file to layer over the defaults (defaults to ./config.toml if present)
    #[clap(long, global = true, env = "TFL_COLLECTOR_CONFIG")]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect one line status snapshot
    Status {
        /// Capture instant stamped on the snapshot (RFC3339, defaults to now)
        #[clap(long, env = "CAPTURE_AT")]
        capture_at: Option<DateTime<Utc>>,
    },

    /// Collect one arrivals snapshot
    Arrivals {
        /// Capture instant stamped on the snapshot (RFC3339, defaults to now)
        #[clap(long, env = "CAPTURE_AT")]
        capture_at: Option<DateTime<Utc>>,
    },

    /// Print the lines discovered for the configured modes
    Lines,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    telemetry::init(&config.telemetry)?;

    let app = app::App::new(config)?;

    match cli.command {
        Commands::Status { capture_at } => {
            let capture = capture_at.unwrap_or_else(Utc::now);
            info!(capture = %capture, "Starting status collection");
            let report = app.run_status(capture).await?;
            print_report(&report)?;
        }

        Commands::Arrivals { capture_at } => {
            let capture = capture_at.unwrap_or_else(Utc::now);
            info!(capture = %capture, "Starting arrivals collection");
            let report = app.run_arrivals(capture).await?;
            print_report(&report)?;
        }

        Commands::Lines => {
            for line in app.list_lines().await? {
                println!(
                    "{}\t{}\t{}",
                    line.id,
                    line.name.as_deref().unwrap_or("-"),
                    line.mode_name.as_deref().unwrap_or("-")
                );
            }
        }
    }

    telemetry::shutdown();
    Ok(())
}

fn print_report(report: &RunReport) -> anyhow::Result<()> {
    if report.is_partial() {
        warn!(
            missing = report.missing.len(),
            "Partial snapshot written, next scheduled run will retry the missing identifiers"
        );
    }
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
