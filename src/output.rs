//! Persistence of intermediate and final tables as CSV.
//!
//! Per-day aggregates double as a cache: if a day's table already exists,
//! the pipeline loads it instead of re-reading the raw extract.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{AggregateRow, DayAggregate, ZoneCode, compact_date};

/// Location of the persisted aggregate for `date` and `origin`.
pub fn day_aggregate_path(dir: &Path, date: NaiveDate, origin: &ZoneCode) -> PathBuf {
    dir.join(format!(
        "{}_{}_agg.csv",
        date.format(compact_date::FORMAT),
        origin
    ))
}

/// Writes `rows` to a fresh CSV file with a header row, replacing any
/// existing file and creating parent directories as needed.
///
/// Rows go to a sibling `.part` file that is renamed into place once fully
/// flushed, so `path` never holds a partial table.
pub fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    debug!(path = %path.display(), rows = rows.len(), "Writing CSV table");

    let partial = path.with_extension("part");
    if let Err(e) = write_rows(&partial, rows) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, path).with_context(|| format!("replacing {}", path.display()))?;

    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

pub fn write_day_aggregate(path: &Path, aggregate: &DayAggregate) -> Result<()> {
    write_table(path, &aggregate.to_rows())
}

/// Loads a persisted per-day aggregate.
pub fn read_day_aggregate(path: &Path, date: NaiveDate) -> Result<DayAggregate> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);

    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: AggregateRow = result?;
        rows.push(row);
    }

    Ok(DayAggregate::from_rows(date, rows))
}
