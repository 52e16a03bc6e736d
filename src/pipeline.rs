//! End-to-end run: per-day aggregation, baseline, scoring and map export.
//!
//! Each day is prepared in its own task. Days share nothing mutable apart
//! from the run's cancellation flag, so a failing or cancelled day never
//! affects the others; the only fan-in is the collection of finished
//! [`DayAggregate`]s. A failed event day cancels the remaining days before
//! the run returns.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};

use crate::aggregate::{AggregateOptions, AggregateReport, aggregate_day, open_record_source};
use crate::analysis::baseline::build_baseline;
use crate::analysis::impact::{
    ImpactRow, Ranking, ScoreSummary, score, significant_increases, top_n,
};
use crate::config::RunConfig;
use crate::fetch::{HttpClient, ensure_extract};
use crate::geo::collection::{GeometryCollection, write_collection};
use crate::geo::merge::{excess_trips, merge};
use crate::output::{day_aggregate_path, read_day_aggregate, write_day_aggregate, write_table};
use crate::types::{DayAggregate, ZoneCode};

const TOP_N: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayRole {
    Event,
    Control,
}

/// How a day's aggregate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySource {
    /// Loaded from a previously persisted table.
    Cached,
    Aggregated(AggregateReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayReport {
    pub date: NaiveDate,
    pub role: DayRole,
    pub source: DaySource,
    pub keys: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDay {
    pub date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    CompletedWithSkippedDays,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub days: Vec<DayReport>,
    pub skipped: Vec<SkippedDay>,
    pub baseline_keys: usize,
    pub summary: ScoreSummary,
    pub max_value: f64,
    pub output_path: PathBuf,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        if self.skipped.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::CompletedWithSkippedDays
        }
    }
}

/// Everything a day task needs, shared read-only across tasks.
struct DayJob {
    data_dir: PathBuf,
    base_url: String,
    keep_raw: bool,
    options: AggregateOptions,
    /// Set once the run has failed. Day side effects on disk happen under
    /// the read lock, so holding the write lock means none are in flight.
    cancelled: RwLock<bool>,
}

type DayTask = JoinHandle<Result<(DayAggregate, DaySource)>>;

/// Aggregates a single local extract.
pub fn aggregate_file(
    path: &Path,
    date: NaiveDate,
    options: &AggregateOptions,
) -> Result<(DayAggregate, AggregateReport)> {
    let source =
        open_record_source(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(aggregate_day(date, source, options)?)
}

/// Returns the day's aggregate, from the persisted table if one exists,
/// otherwise by fetching and aggregating the raw extract.
async fn prepare_day<C: HttpClient>(
    client: &C,
    job: Arc<DayJob>,
    date: NaiveDate,
) -> Result<(DayAggregate, DaySource)> {
    let cached = day_aggregate_path(&job.data_dir, date, &job.options.origin);
    if tokio::fs::try_exists(&cached).await? {
        info!(path = %cached.display(), "Aggregate already persisted, skipping");
        let aggregate =
            tokio::task::spawn_blocking(move || read_day_aggregate(&cached, date)).await??;
        return Ok((aggregate, DaySource::Cached));
    }

    let raw = ensure_extract(client, &job.base_url, &job.data_dir, date).await?;

    let worker_job = job.clone();
    let (aggregate, report) = tokio::task::spawn_blocking(move || {
        let (aggregate, report) = aggregate_file(&raw, date, &worker_job.options)?;

        let cancelled = worker_job.cancelled.blocking_read();
        if *cancelled {
            bail!("run cancelled before {date} was persisted");
        }
        write_day_aggregate(&cached, &aggregate)?;
        if !worker_job.keep_raw {
            fs::remove_file(&raw).with_context(|| format!("removing {}", raw.display()))?;
        }
        anyhow::Ok((aggregate, report))
    })
    .await??;

    info!(
        rows_read = report.rows_read,
        rows_retained = report.rows_retained,
        rows_excluded = report.rows_excluded,
        rows_malformed = report.rows_malformed,
        chunks = report.chunks,
        keys = aggregate.len(),
        "Day aggregated"
    );

    Ok((aggregate, DaySource::Aggregated(report)))
}

/// Runs the whole analysis described by `config`.
///
/// Fails if the event day, the geometry or any output cannot be processed.
/// Control days that fail are reported in [`RunReport::skipped`].
#[tracing::instrument(skip_all, fields(origin = %config.origin, event_date = %config.event_date))]
pub async fn run<C: HttpClient + 'static>(config: &RunConfig, client: Arc<C>) -> Result<RunReport> {
    config.validate()?;

    let geometry = GeometryCollection::load(
        &config.geometry_path,
        &config.geometry_id_property,
        config.zone_width,
    )?;
    let valid: HashSet<ZoneCode> = geometry
        .ids()
        .iter()
        .filter(|id| id.is_valid())
        .cloned()
        .collect();
    info!(valid_ids = valid.len(), "Destination filter ready");

    let job = Arc::new(DayJob {
        data_dir: config.data_dir.clone(),
        base_url: config.base_url.clone(),
        keep_raw: config.keep_raw,
        options: config.aggregate_options(Some(valid)),
        cancelled: RwLock::new(false),
    });

    let days = std::iter::once((config.event_date, DayRole::Event)).chain(
        config
            .control_dates
            .iter()
            .map(|date| (*date, DayRole::Control)),
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
    let mut tasks = Vec::new();
    for (date, role) in days {
        let sem = semaphore.clone();
        let client = client.clone();
        let job = job.clone();
        let span = tracing::info_span!("prepare_day", date = %date, role = ?role);

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                prepare_day(client.as_ref(), job, date).await
            }
            .instrument(span),
        );
        tasks.push((date, role, task));
    }

    let mut event: Option<DayAggregate> = None;
    let mut controls = Vec::new();
    let mut reports = Vec::new();
    let mut skipped = Vec::new();

    let mut pending = tasks.into_iter();
    while let Some((date, role, task)) = pending.next() {
        let outcome = match task.await {
            Ok(result) => result,
            Err(join_error) => Err(anyhow::anyhow!("day task aborted: {join_error}")),
        };

        match outcome {
            Ok((aggregate, source)) => {
                reports.push(DayReport {
                    date,
                    role,
                    source,
                    keys: aggregate.len(),
                });
                match role {
                    DayRole::Event => event = Some(aggregate),
                    DayRole::Control => controls.push(aggregate),
                }
            }
            Err(e) if role == DayRole::Event => {
                cancel_days(&job, pending.map(|(_, _, task)| task)).await;
                return Err(e.context(format!("event day {date} could not be processed")));
            }
            Err(e) => {
                error!(date = %date, error = %format!("{e:#}"), "Control day skipped");
                skipped.push(SkippedDay {
                    date,
                    reason: format!("{e:#}"),
                });
            }
        }
    }

    let Some(event) = event else {
        bail!("event day {} produced no aggregate", config.event_date);
    };

    if controls.len() < config.min_n {
        warn!(
            controls = controls.len(),
            min_n = config.min_n,
            "Fewer control days than min_n; the baseline will be empty"
        );
    }

    let baseline = build_baseline(&controls, config.baseline_options());
    write_table(
        &config.analysis_dir.join("expected_stats.csv"),
        &baseline.to_rows(),
    )?;

    let rows = score(&event, &baseline);
    write_table(&config.analysis_dir.join("impact.csv"), &rows)?;

    let increases = significant_increases(&rows);
    write_table(
        &config.analysis_dir.join("impact_significant.csv"),
        &increases,
    )?;

    let summary = ScoreSummary::from_rows(&rows);
    info!(
        keys_scored = summary.keys_scored,
        keys_significant = summary.keys_significant,
        significant_increases = summary.significant_increases,
        destinations_affected = summary.destinations_affected,
        "Scoring complete"
    );
    log_top(&increases, Ranking::Absolute);
    log_top(&increases, Ranking::Percent);

    let series = merge(&rows, excess_trips, geometry.ids());
    let max_value = series.max_value;
    let collection = geometry.annotate(&series, &config.labels())?;
    let output_path = config.output_path();
    write_collection(&output_path, &collection)?;
    info!(path = %output_path.display(), max_value, "Impact map written");

    Ok(RunReport {
        days: reports,
        skipped,
        baseline_keys: baseline.len(),
        summary,
        max_value,
        output_path,
    })
}

/// Stops the remaining day tasks. Once this returns nothing is running
/// and no further aggregate or raw file will be written or removed.
async fn cancel_days(job: &DayJob, tasks: impl Iterator<Item = DayTask>) {
    *job.cancelled.write().await = true;

    let tasks: Vec<DayTask> = tasks.collect();
    for task in &tasks {
        task.abort();
    }
    let stopped = tasks.len();
    for task in tasks {
        let _ = task.await;
    }
    warn!(stopped, "Remaining day tasks cancelled");
}

fn log_top(rows: &[ImpactRow], ranking: Ranking) {
    for (rank, row) in top_n(rows, ranking, TOP_N).into_iter().enumerate() {
        info!(
            ranking = ?ranking,
            rank = rank + 1,
            destination = %row.destination,
            period = row.period.0,
            observed = row.observed,
            mean = row.mean,
            diff_abs = row.diff_abs,
            diff_pct = row.diff_pct,
            z = row.z,
            "Top impact"
        );
    }
}
