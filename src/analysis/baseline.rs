use serde::Serialize;
use std::collections::BTreeMap;

use crate::analysis::utility::{mean, sample_stddev};
use crate::types::{AggregateKey, DayAggregate, Period, ZoneCode};

pub const DEFAULT_MIN_N: usize = 3;
/// Two-sided ~95% multiplier under a normal approximation.
pub const DEFAULT_Z: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineOptions {
    /// Keys seen on fewer control days than this are left out entirely.
    pub min_n: usize,
    pub z: f64,
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self {
            min_n: DEFAULT_MIN_N,
            z: DEFAULT_Z,
        }
    }
}

/// Expected volume for one key, estimated from the control days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStat {
    pub n: usize,
    pub mean: f64,
    pub std: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

impl BaselineStat {
    /// Builds the statistic from the volumes of the days where the key appeared.
    pub fn from_samples(samples: &[f64], z: f64) -> Self {
        let n = samples.len();
        let avg = mean(samples);
        let std = sample_stddev(samples, avg);
        let margin = if n == 0 {
            0.0
        } else {
            z * std / (n as f64).sqrt()
        };

        Self {
            n,
            mean: avg,
            std,
            ci_low: (avg - margin).max(0.0),
            ci_high: avg + margin,
        }
    }
}

/// Per-key baseline. A missing key means there was not enough evidence to
/// make any claim, which is different from an expected volume of zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    stats: BTreeMap<AggregateKey, BaselineStat>,
}

impl Baseline {
    pub fn get(&self, key: &AggregateKey) -> Option<&BaselineStat> {
        self.stats.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AggregateKey, &BaselineStat)> {
        self.stats.iter()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn to_rows(&self) -> Vec<BaselineRow> {
        self.iter()
            .map(|(key, stat)| BaselineRow {
                destination: key.destination.clone(),
                period: key.period,
                n: stat.n,
                mean: stat.mean,
                std: stat.std,
                ci_low: stat.ci_low,
                ci_high: stat.ci_high,
            })
            .collect()
    }
}

/// Persisted form of one baseline entry.
#[derive(Debug, Clone, Serialize)]
pub struct BaselineRow {
    pub destination: ZoneCode,
    pub period: Period,
    pub n: usize,
    pub mean: f64,
    pub std: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Builds the baseline from the control-day aggregates.
///
/// Only days on which a key actually appeared contribute a sample; a day
/// without the key is not read as an observed zero.
#[tracing::instrument(skip_all, fields(control_days = controls.len(), min_n = options.min_n))]
pub fn build_baseline(controls: &[DayAggregate], options: BaselineOptions) -> Baseline {
    let mut samples: BTreeMap<&AggregateKey, Vec<f64>> = BTreeMap::new();
    for day in controls {
        for (key, volume) in day.iter() {
            samples.entry(key).or_default().push(volume);
        }
    }

    let total_keys = samples.len();
    let stats: BTreeMap<AggregateKey, BaselineStat> = samples
        .into_iter()
        .filter(|(_, values)| values.len() >= options.min_n)
        .map(|(key, values)| (key.clone(), BaselineStat::from_samples(&values, options.z)))
        .collect();

    tracing::debug!(
        total_keys,
        retained_keys = stats.len(),
        "Baseline built"
    );

    Baseline { stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key(dest: &str, hour: u8) -> AggregateKey {
        AggregateKey::new(ZoneCode::padded(dest, 5), Period(hour))
    }

    fn day(d: u32, entries: &[(&str, u8, f64)]) -> DayAggregate {
        let date = NaiveDate::from_ymd_opt(2025, 3, d).unwrap();
        DayAggregate::new(
            date,
            entries
                .iter()
                .map(|(dest, hour, v)| (key(dest, *hour), *v))
                .collect(),
        )
    }

    #[test]
    fn test_mean_std_and_interval() {
        let controls = vec![
            day(5, &[("28079", 8, 100.0)]),
            day(19, &[("28079", 8, 110.0)]),
            day(26, &[("28079", 8, 90.0)]),
        ];
        let baseline = build_baseline(&controls, BaselineOptions::default());
        let stat = baseline.get(&key("28079", 8)).unwrap();

        assert_eq!(stat.n, 3);
        assert_eq!(stat.mean, 100.0);
        assert_eq!(stat.std, 10.0);
        let se = 10.0 / 3f64.sqrt();
        assert!((stat.ci_high - (100.0 + 1.96 * se)).abs() < 1e-9);
        assert!((stat.ci_high - 111.316).abs() < 1e-3);
        assert!((stat.ci_low - (100.0 - 1.96 * se)).abs() < 1e-9);
    }

    #[test]
    fn test_absent_days_are_not_zero_samples() {
        let controls = vec![
            day(5, &[("28079", 3, 20.0)]),
            day(19, &[("28079", 8, 1.0)]),
            day(26, &[("28079", 8, 1.0)]),
        ];
        let baseline = build_baseline(&controls, BaselineOptions::default());

        assert!(baseline.get(&key("28079", 3)).is_none());
        assert!(baseline.get(&key("28079", 8)).is_none());
        assert!(baseline.is_empty());
    }

    #[test]
    fn test_key_at_min_n_minus_one_is_absent() {
        let options = BaselineOptions { min_n: 4, z: 1.96 };
        let controls: Vec<_> = (1..=3).map(|d| day(d, &[("28006", 10, 5.0)])).collect();
        assert!(build_baseline(&controls, options).get(&key("28006", 10)).is_none());

        let controls: Vec<_> = (1..=4).map(|d| day(d, &[("28006", 10, 5.0)])).collect();
        assert!(build_baseline(&controls, options).get(&key("28006", 10)).is_some());
    }

    #[test]
    fn test_single_sample_has_zero_std() {
        let options = BaselineOptions { min_n: 1, z: 1.96 };
        let baseline = build_baseline(&[day(5, &[("28079", 8, 20.0)])], options);
        let stat = baseline.get(&key("28079", 8)).unwrap();

        assert_eq!(stat.std, 0.0);
        assert_eq!(stat.ci_low, 20.0);
        assert_eq!(stat.ci_high, 20.0);
        assert!(!stat.std.is_nan());
    }

    #[test]
    fn test_ci_low_is_floored_at_zero() {
        let controls = vec![
            day(1, &[("28079", 1, 0.0)]),
            day(2, &[("28079", 1, 0.0)]),
            day(3, &[("28079", 1, 30.0)]),
        ];
        let baseline = build_baseline(&controls, BaselineOptions::default());
        assert_eq!(baseline.get(&key("28079", 1)).unwrap().ci_low, 0.0);
    }

    #[test]
    fn test_rows_follow_key_order() {
        let controls: Vec<_> = (1..=3)
            .map(|d| day(d, &[("28079", 9, 1.0), ("28006", 9, 2.0)]))
            .collect();
        let rows = build_baseline(&controls, BaselineOptions::default()).to_rows();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].destination.as_str(), "28006");
        assert_eq!(rows[1].mean, 1.0);
    }
}
