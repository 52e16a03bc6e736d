//! CLI entry point for the mobility impact tool.
//!
//! Provides subcommands for running the full event-day impact analysis,
//! aggregating a single local extract, and downloading daily extracts.

use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use mobility_impact::config::{DEFAULT_BASE_URL, RunConfig};
use mobility_impact::fetch::{BasicClient, ensure_extract};
use mobility_impact::geo::collection::GeometryCollection;
use mobility_impact::normalize::normalize_zone;
use mobility_impact::output::write_day_aggregate;
use mobility_impact::pipeline::{self, DaySource, RunStatus, aggregate_file};
use mobility_impact::{aggregate::AggregateOptions, types::ZoneCode};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Exit status for a run that finished but had to skip control days.
const EXIT_SKIPPED_DAYS: u8 = 2;

#[derive(Parser)]
#[command(name = "mobility_impact")]
#[command(about = "Measure event-day deviations in origin-destination trip flows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis: aggregate days, build the baseline, score and export the map
    Run {
        /// JSON run configuration
        #[arg(short, long, default_value = "impact.json")]
        config: PathBuf,

        /// Override the configured event date (YYYY-MM-DD)
        #[arg(long)]
        event_date: Option<NaiveDate>,

        /// Override the configured control dates (repeatable)
        #[arg(long = "control-date")]
        control_dates: Vec<NaiveDate>,
    },
    /// Aggregate one local extract into a per-day CSV table
    Aggregate {
        /// Extract to read (.csv or .csv.gz)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Origin zone to keep
        #[arg(long)]
        origin: String,

        /// Date the extract covers (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// CSV file to write the aggregate to
        #[arg(short, long, default_value = "aggregate.csv")]
        output: PathBuf,

        /// Optional GeoJSON whose ids restrict the destinations
        #[arg(long)]
        geometry: Option<PathBuf>,

        /// Feature property holding the zone id
        #[arg(long, default_value = "ID")]
        id_property: String,

        /// Zone code width
        #[arg(long, default_value_t = 5)]
        zone_width: usize,

        /// Rows per chunk
        #[arg(long, default_value_t = 500_000)]
        chunk_size: usize,
    },
    /// Download daily extracts for a date or an inclusive date range
    Fetch {
        /// First date to download (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last date to download; defaults to `start`
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Directory to store the extracts in
        #[arg(short, long, default_value = "data/mobility")]
        output_dir: PathBuf,

        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/mobility_impact.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("mobility_impact.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            event_date,
            control_dates,
        } => {
            let mut config = RunConfig::load(&config)?;
            if let Some(date) = event_date {
                config.event_date = date;
            }
            if !control_dates.is_empty() {
                config.control_dates = control_dates;
            }

            let report = pipeline::run(&config, Arc::new(BasicClient::new())).await?;

            for day in &report.days {
                match day.source {
                    DaySource::Cached => {
                        info!(date = %day.date, role = ?day.role, keys = day.keys, "Day loaded from cache")
                    }
                    DaySource::Aggregated(r) => info!(
                        date = %day.date,
                        role = ?day.role,
                        rows_read = r.rows_read,
                        rows_retained = r.rows_retained,
                        rows_excluded = r.rows_excluded,
                        keys = day.keys,
                        "Day aggregated"
                    ),
                }
            }
            for day in &report.skipped {
                warn!(date = %day.date, reason = %day.reason, "Day skipped");
            }
            info!(
                keys_scored = report.summary.keys_scored,
                keys_significant = report.summary.keys_significant,
                baseline_keys = report.baseline_keys,
                output = %report.output_path.display(),
                "Run finished"
            );

            if report.status() == RunStatus::CompletedWithSkippedDays {
                return Ok(ExitCode::from(EXIT_SKIPPED_DAYS));
            }
        }
        Commands::Aggregate {
            input,
            origin,
            date,
            output,
            geometry,
            id_property,
            zone_width,
            chunk_size,
        } => {
            let origin = normalize_zone(&origin, zone_width);
            if !origin.is_valid() {
                bail!("origin must be a numeric zone code");
            }

            let valid_destinations = match geometry {
                Some(path) => {
                    let collection = GeometryCollection::load(&path, &id_property, zone_width)?;
                    let ids: HashSet<ZoneCode> = collection
                        .ids()
                        .iter()
                        .filter(|id| id.is_valid())
                        .cloned()
                        .collect();
                    Some(ids)
                }
                None => None,
            };

            let options = AggregateOptions {
                valid_destinations,
                chunk_size,
                zone_width,
                ..AggregateOptions::new(origin)
            };

            let (aggregate, report) =
                tokio::task::spawn_blocking(move || aggregate_file(&input, date, &options))
                    .await??;
            write_day_aggregate(&output, &aggregate)?;

            info!(
                rows_read = report.rows_read,
                rows_retained = report.rows_retained,
                rows_excluded = report.rows_excluded,
                rows_malformed = report.rows_malformed,
                keys = aggregate.len(),
                output = %output.display(),
                "Aggregate written"
            );
        }
        Commands::Fetch {
            start,
            end,
            output_dir,
            base_url,
        } => {
            let end = end.unwrap_or(start);
            if end < start {
                bail!("end date {end} is before start date {start}");
            }

            let client = BasicClient::new();
            let mut failed = 0usize;
            for date in start.iter_days().take_while(|d| *d <= end) {
                match ensure_extract(&client, &base_url, &output_dir, date).await {
                    Ok(path) => info!(date = %date, path = %path.display(), "Extract ready"),
                    Err(e) => {
                        failed += 1;
                        error!(date = %date, error = %format!("{e:#}"), "Extract download failed");
                    }
                }
            }

            if failed > 0 {
                return Ok(ExitCode::from(EXIT_SKIPPED_DAYS));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
