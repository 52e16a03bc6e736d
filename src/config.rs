//! Run configuration.
//!
//! Stored as a JSON file on disk; everything except the origin, the dates
//! and the geometry path has a default:
//! ```json
//! {
//!   "origin": "2807920",
//!   "event_date": "2025-03-12",
//!   "control_dates": ["2025-03-05", "2025-03-19", "2025-03-26"],
//!   "geometry_path": "zonificacion_distritos.geojson"
//! }
//! ```

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::aggregate::{
    AggregateOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PERIOD, DEFAULT_ZONE_WIDTH,
};
use crate::analysis::baseline::{BaselineOptions, DEFAULT_MIN_N, DEFAULT_Z};
use crate::geo::collection::AnnotationLabels;
use crate::normalize::normalize_zone;
use crate::types::{HOURS_PER_DAY, ZoneCode};

pub const DEFAULT_BASE_URL: &str =
    "https://movilidad-opendata.mitma.es/estudios_basicos/por-distritos/viajes/ficheros-diarios";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_analysis_dir")]
    pub analysis_dir: PathBuf,
    #[serde(default = "default_map_dir")]
    pub map_dir: PathBuf,

    /// Raw origin zone; normalized with `zone_width` before use.
    pub origin: String,
    pub event_date: NaiveDate,
    #[serde(default)]
    pub control_dates: Vec<NaiveDate>,

    pub geometry_path: PathBuf,
    #[serde(default = "default_geometry_id_property")]
    pub geometry_id_property: String,

    #[serde(default = "default_zone_width")]
    pub zone_width: usize,
    #[serde(default = "default_max_period")]
    pub max_period: u8,
    #[serde(default)]
    pub reject_invalid_periods: bool,
    #[serde(default = "default_min_n")]
    pub min_n: usize,
    #[serde(default = "default_z")]
    pub z: f64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Keep downloaded extracts after they have been aggregated.
    #[serde(default)]
    pub keep_raw: bool,

    #[serde(default = "default_output_name")]
    pub output_name: String,
    #[serde(default = "default_hour_map_property")]
    pub hour_map_property: String,
}

impl RunConfig {
    /// Loads and validates the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.min_n == 0 {
            return invalid("min_n must be at least 1");
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size must be at least 1");
        }
        if self.zone_width == 0 {
            return invalid("zone_width must be at least 1");
        }
        if usize::from(self.max_period) >= HOURS_PER_DAY {
            return invalid("max_period must be at most 23");
        }
        if !self.delimiter.is_ascii() {
            return invalid("delimiter must be a single ASCII character");
        }
        if !(self.z.is_finite() && self.z > 0.0) {
            return invalid("z must be a positive number");
        }
        if self.max_concurrency == 0 {
            return invalid("max_concurrency must be at least 1");
        }
        if !self.origin_zone().is_valid() {
            return invalid("origin is not a numeric zone code");
        }
        if self.control_dates.contains(&self.event_date) {
            return invalid("event_date is also listed as a control date");
        }
        let unique: HashSet<_> = self.control_dates.iter().collect();
        if unique.len() != self.control_dates.len() {
            return invalid("control_dates contains duplicates");
        }
        Ok(())
    }

    pub fn origin_zone(&self) -> ZoneCode {
        normalize_zone(&self.origin, self.zone_width)
    }

    pub fn aggregate_options(&self, valid_destinations: Option<HashSet<ZoneCode>>) -> AggregateOptions {
        AggregateOptions {
            origin: self.origin_zone(),
            valid_destinations,
            chunk_size: self.chunk_size,
            delimiter: self.delimiter as u8,
            zone_width: self.zone_width,
            max_period: self.max_period,
            reject_invalid_periods: self.reject_invalid_periods,
        }
    }

    pub fn baseline_options(&self) -> BaselineOptions {
        BaselineOptions {
            min_n: self.min_n,
            z: self.z,
        }
    }

    pub fn labels(&self) -> AnnotationLabels {
        AnnotationLabels {
            hour_map_property: self.hour_map_property.clone(),
            ..AnnotationLabels::default()
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.map_dir.join(&self.output_name)
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/mobility")
}

fn default_analysis_dir() -> PathBuf {
    PathBuf::from("data/analysis")
}

fn default_map_dir() -> PathBuf {
    PathBuf::from("data/map")
}

fn default_geometry_id_property() -> String {
    "ID".to_string()
}

fn default_zone_width() -> usize {
    DEFAULT_ZONE_WIDTH
}

fn default_max_period() -> u8 {
    DEFAULT_MAX_PERIOD
}

fn default_min_n() -> usize {
    DEFAULT_MIN_N
}

fn default_z() -> f64 {
    DEFAULT_Z
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_delimiter() -> char {
    '|'
}

fn default_max_concurrency() -> usize {
    4
}

fn default_output_name() -> String {
    "impact_by_hour.geojson".to_string()
}

fn default_hour_map_property() -> String {
    "impact_by_hour".to_string()
}
