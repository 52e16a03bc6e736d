//! Core data types shared by every stage of the pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of hour buckets in a day. Hourly maps are always this dense.
pub const HOURS_PER_DAY: usize = 24;

/// Canonical zone identifier, zero-padded to a configured width.
///
/// Codes longer than the width are kept whole. An input that cannot be read
/// as an integer becomes [`ZoneCode::invalid`], which never equals a valid
/// code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneCode(String);

impl ZoneCode {
    const INVALID: &'static str = "<NA>";

    /// Zero-pads an already-canonical digit string to `width`.
    pub fn padded(raw: &str, width: usize) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Self::invalid();
        }
        Self(format!("{raw:0>width$}"))
    }

    pub fn invalid() -> Self {
        Self(Self::INVALID.to_string())
    }

    pub fn is_valid(&self) -> bool {
        self.0 != Self::INVALID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hour-of-day bucket.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Period(pub u8);

impl Period {
    pub fn hour(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One normalized input row. Only lives for the duration of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct TripRecord {
    pub origin: ZoneCode,
    pub destination: ZoneCode,
    pub period: Period,
    pub volume: f64,
}

/// Grouping key used throughout: `(destination, period)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub destination: ZoneCode,
    pub period: Period,
}

impl AggregateKey {
    pub fn new(destination: ZoneCode, period: Period) -> Self {
        Self {
            destination,
            period,
        }
    }
}

/// Summed trip volume per key for a single calendar day.
///
/// Immutable once built; downstream stages only borrow it.
#[derive(Debug, Clone, PartialEq)]
pub struct DayAggregate {
    date: NaiveDate,
    volumes: BTreeMap<AggregateKey, f64>,
}

impl DayAggregate {
    pub fn new(date: NaiveDate, volumes: BTreeMap<AggregateKey, f64>) -> Self {
        Self { date, volumes }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn get(&self, key: &AggregateKey) -> Option<f64> {
        self.volumes.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AggregateKey, f64)> {
        self.volumes.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.volumes.values().sum()
    }
}

/// Flat row form of a [`DayAggregate`] entry, as persisted in the column store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    #[serde(with = "compact_date")]
    pub date: NaiveDate,
    pub destination: ZoneCode,
    pub period: Period,
    pub trips: f64,
}

impl DayAggregate {
    pub fn to_rows(&self) -> Vec<AggregateRow> {
        self.iter()
            .map(|(key, trips)| AggregateRow {
                date: self.date,
                destination: key.destination.clone(),
                period: key.period,
                trips,
            })
            .collect()
    }

    /// Rebuilds an aggregate from persisted rows, summing duplicate keys.
    pub fn from_rows(date: NaiveDate, rows: impl IntoIterator<Item = AggregateRow>) -> Self {
        let mut volumes = BTreeMap::new();
        for row in rows {
            *volumes
                .entry(AggregateKey::new(row.destination, row.period))
                .or_insert(0.0) += row.trips;
        }
        Self::new(date, volumes)
    }
}

/// `YYYYMMDD` date encoding used by the source files and persisted tables.
pub mod compact_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y%m%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_zone_keeps_long_codes() {
        assert_eq!(ZoneCode::padded("79", 5).as_str(), "00079");
        assert_eq!(ZoneCode::padded("2807920", 5).as_str(), "2807920");
        assert!(!ZoneCode::padded("28079_AM", 5).is_valid());
        assert!(!ZoneCode::padded("", 5).is_valid());
    }

    #[test]
    fn test_from_rows_sums_duplicate_keys() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
        let row = |trips| AggregateRow {
            date,
            destination: ZoneCode::padded("28079", 5),
            period: Period(8),
            trips,
        };
        let agg = DayAggregate::from_rows(date, vec![row(10.0), row(5.5)]);

        assert_eq!(agg.len(), 1);
        assert_eq!(agg.total(), 15.5);
        assert_eq!(agg.to_rows()[0].trips, 15.5);
    }
}
