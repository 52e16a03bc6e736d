//! Chunked reduction of one day's origin-destination extract into a
//! [`DayAggregate`].
//!
//! Rows are buffered in fixed-size chunks so peak memory depends on the
//! chunk size, not on the size of the extract. Each chunk is normalized,
//! filtered and summed on its own, then merged into the running total.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use flate2::read::MultiGzDecoder;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

use crate::normalize::{normalize_period, normalize_volume, normalize_zone};
use crate::schema::{self, ResolvedSchema, SchemaError};
use crate::types::{AggregateKey, DayAggregate, TripRecord, ZoneCode};

pub const DEFAULT_CHUNK_SIZE: usize = 500_000;
pub const DEFAULT_DELIMITER: u8 = b'|';
pub const DEFAULT_ZONE_WIDTH: usize = 5;
pub const DEFAULT_MAX_PERIOD: u8 = 23;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The record source itself failed; the day cannot be aggregated.
    #[error("I/O error reading records: {0}")]
    Io(#[source] csv::Error),

    #[error("unreadable header: {0}")]
    Header(#[source] csv::Error),
}

/// Filters and parsing parameters for one day's aggregation.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub origin: ZoneCode,
    /// Restricts destinations to a known id space (e.g. the geometry ids).
    pub valid_destinations: Option<HashSet<ZoneCode>>,
    pub chunk_size: usize,
    pub delimiter: u8,
    pub zone_width: usize,
    pub max_period: u8,
    pub reject_invalid_periods: bool,
}

impl AggregateOptions {
    pub fn new(origin: ZoneCode) -> Self {
        Self {
            origin,
            valid_destinations: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: DEFAULT_DELIMITER,
            zone_width: DEFAULT_ZONE_WIDTH,
            max_period: DEFAULT_MAX_PERIOD,
            reject_invalid_periods: false,
        }
    }
}

/// Row accounting for one day, surfaced in the run log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateReport {
    pub rows_read: u64,
    pub rows_retained: u64,
    /// Everything not retained: filtered out or malformed.
    pub rows_excluded: u64,
    /// Subset of `rows_excluded` that failed normalization.
    pub rows_malformed: u64,
    pub chunks: u64,
}

/// Running state of a chunked aggregation.
///
/// Only the summed totals survive between chunks.
pub struct StreamingAggregator<'a> {
    options: &'a AggregateOptions,
    totals: HashMap<AggregateKey, f64>,
    retained: u64,
    chunks: u64,
}

impl<'a> StreamingAggregator<'a> {
    pub fn new(options: &'a AggregateOptions) -> Self {
        Self {
            options,
            totals: HashMap::new(),
            retained: 0,
            chunks: 0,
        }
    }

    /// Filters and sums one chunk of normalized records, then merges the
    /// partial sums into the running total. Returns how many records were kept.
    pub fn push_chunk<I>(&mut self, records: I) -> u64
    where
        I: IntoIterator<Item = TripRecord>,
    {
        let mut partial: HashMap<AggregateKey, f64> = HashMap::new();
        let mut kept = 0u64;

        for record in records {
            if record.origin != self.options.origin {
                continue;
            }
            // Intra-zone trips say nothing about flows leaving the origin.
            if record.destination == record.origin {
                continue;
            }
            if let Some(valid) = &self.options.valid_destinations {
                if !valid.contains(&record.destination) {
                    continue;
                }
            }

            *partial
                .entry(AggregateKey::new(record.destination, record.period))
                .or_insert(0.0) += record.volume;
            kept += 1;
        }

        for (key, volume) in partial {
            *self.totals.entry(key).or_insert(0.0) += volume;
        }

        self.retained += kept;
        self.chunks += 1;
        kept
    }

    pub fn retained(&self) -> u64 {
        self.retained
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn finish(self, date: NaiveDate) -> DayAggregate {
        DayAggregate::new(date, self.totals.into_iter().collect::<BTreeMap<_, _>>())
    }
}

/// Normalizes a raw row. `None` means the row is malformed and must not
/// contribute to any sum.
pub fn normalize_record(
    record: &StringRecord,
    schema: &ResolvedSchema,
    options: &AggregateOptions,
) -> Option<TripRecord> {
    if record.len() < schema.min_fields() {
        return None;
    }

    let origin = normalize_zone(&record[schema.origin], options.zone_width);
    let destination = normalize_zone(&record[schema.destination], options.zone_width);
    if !origin.is_valid() || !destination.is_valid() {
        return None;
    }

    let period = normalize_period(&record[schema.period], options.max_period);
    if !period.clean && options.reject_invalid_periods {
        return None;
    }

    Some(TripRecord {
        origin,
        destination,
        period: period.value,
        volume: normalize_volume(&record[schema.volume]),
    })
}

/// Aggregates a whole record source for `date`.
///
/// Row-level problems are counted and skipped. Only a failing source (I/O)
/// or an unrecognized header aborts, and no partial aggregate is returned
/// in that case.
#[tracing::instrument(skip(source, options), fields(date = %date, origin = %options.origin))]
pub fn aggregate_day<R: Read>(
    date: NaiveDate,
    source: R,
    options: &AggregateOptions,
) -> Result<(DayAggregate, AggregateReport), AggregateError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(source);

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) if is_io(&e) => return Err(AggregateError::Io(e)),
        Err(e) => return Err(AggregateError::Header(e)),
    };
    let schema = schema::resolve(&headers)?;
    debug!(schema = schema.schema.name, version = schema.schema.version, "Schema resolved");

    let chunk_size = options.chunk_size.max(1);
    let mut aggregator = StreamingAggregator::new(options);
    let mut chunk: Vec<TripRecord> = Vec::with_capacity(chunk_size.min(64 * 1024));
    let mut record = StringRecord::new();
    let mut rows_read = 0u64;
    let mut rows_malformed = 0u64;

    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {
                rows_read += 1;
                match normalize_record(&record, &schema, options) {
                    Some(trip) => chunk.push(trip),
                    None => rows_malformed += 1,
                }
            }
            Ok(false) => break,
            Err(e) if is_io(&e) => return Err(AggregateError::Io(e)),
            Err(_) => {
                rows_read += 1;
                rows_malformed += 1;
            }
        }

        if chunk.len() >= chunk_size {
            aggregator.push_chunk(chunk.drain(..));
        }
    }
    if !chunk.is_empty() {
        aggregator.push_chunk(chunk.drain(..));
    }

    let report = AggregateReport {
        rows_read,
        rows_retained: aggregator.retained(),
        rows_excluded: rows_read - aggregator.retained(),
        rows_malformed,
        chunks: aggregator.chunks(),
    };

    Ok((aggregator.finish(date), report))
}

/// Opens a daily extract, transparently decompressing `.gz` files.
pub fn open_record_source(path: &Path) -> std::io::Result<Box<dyn Read + Send>> {
    let file = BufReader::new(File::open(path)?);
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn is_io(e: &csv::Error) -> bool {
    matches!(e.kind(), csv::ErrorKind::Io(_))
}
