use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::analysis::baseline::Baseline;
use crate::types::{DayAggregate, Period, ZoneCode};

/// Event-day observation joined with its baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactRow {
    pub destination: ZoneCode,
    pub period: Period,
    pub observed: f64,
    pub n: usize,
    pub mean: f64,
    pub std: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub diff_abs: f64,
    pub diff_pct: f64,
    pub z: f64,
    pub significant: bool,
}

/// Scores every key present both in the event day and in the baseline.
///
/// Keys missing on either side produce no row. Rows come out in key order,
/// which callers must not rely on for ranking.
#[tracing::instrument(skip_all, fields(date = %event.date(), baseline_keys = baseline.len()))]
pub fn score(event: &DayAggregate, baseline: &Baseline) -> Vec<ImpactRow> {
    event
        .iter()
        .filter_map(|(key, observed)| {
            let stat = baseline.get(key)?;
            let diff_abs = observed - stat.mean;

            Some(ImpactRow {
                destination: key.destination.clone(),
                period: key.period,
                observed,
                n: stat.n,
                mean: stat.mean,
                std: stat.std,
                ci_low: stat.ci_low,
                ci_high: stat.ci_high,
                diff_abs,
                diff_pct: if stat.mean > 0.0 {
                    100.0 * diff_abs / stat.mean
                } else {
                    0.0
                },
                z: if stat.std > 0.0 {
                    diff_abs / stat.std
                } else {
                    0.0
                },
                significant: observed > stat.ci_high,
            })
        })
        .collect()
}

/// Rows that are significant and above the baseline mean.
pub fn significant_increases(rows: &[ImpactRow]) -> Vec<ImpactRow> {
    rows.iter()
        .filter(|r| r.significant && r.diff_abs > 0.0)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    Absolute,
    Percent,
}

impl Ranking {
    fn value(self, row: &ImpactRow) -> f64 {
        match self {
            Ranking::Absolute => row.diff_abs,
            Ranking::Percent => row.diff_pct,
        }
    }
}

/// The `n` rows with the largest difference, descending.
pub fn top_n(rows: &[ImpactRow], ranking: Ranking, n: usize) -> Vec<&ImpactRow> {
    let mut sorted: Vec<&ImpactRow> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        ranking
            .value(b)
            .partial_cmp(&ranking.value(a))
            .unwrap_or(Ordering::Equal)
    });
    sorted.truncate(n);
    sorted
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreSummary {
    pub keys_scored: usize,
    pub keys_significant: usize,
    pub significant_increases: usize,
    pub destinations_affected: usize,
}

impl ScoreSummary {
    pub fn from_rows(rows: &[ImpactRow]) -> Self {
        let increases: Vec<&ImpactRow> = rows
            .iter()
            .filter(|r| r.significant && r.diff_abs > 0.0)
            .collect();
        let destinations: HashSet<&ZoneCode> = increases.iter().map(|r| &r.destination).collect();

        Self {
            keys_scored: rows.len(),
            keys_significant: rows.iter().filter(|r| r.significant).count(),
            significant_increases: increases.len(),
            destinations_affected: destinations.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::baseline::{BaselineOptions, build_baseline};
    use crate::types::AggregateKey;
    use chrono::NaiveDate;

    fn key(dest: &str, hour: u8) -> AggregateKey {
        AggregateKey::new(ZoneCode::padded(dest, 5), Period(hour))
    }

    fn day(d: u32, entries: &[(&str, u8, f64)]) -> DayAggregate {
        DayAggregate::new(
            NaiveDate::from_ymd_opt(2025, 3, d).unwrap(),
            entries
                .iter()
                .map(|(dest, hour, v)| (key(dest, *hour), *v))
                .collect(),
        )
    }

    fn baseline(entries: &[&[(&str, u8, f64)]]) -> Baseline {
        let controls: Vec<_> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| day(i as u32 + 1, e))
            .collect();
        build_baseline(&controls, BaselineOptions::default())
    }

    #[test]
    fn test_worked_example() {
        let base = baseline(&[
            &[("28079", 8, 100.0)],
            &[("28079", 8, 110.0)],
            &[("28079", 8, 90.0)],
        ]);
        let rows = score(&day(12, &[("28079", 8, 150.0)]), &base);

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.diff_abs, 50.0);
        assert_eq!(row.diff_pct, 50.0);
        assert_eq!(row.z, 5.0);
        assert!(row.significant);
    }

    #[test]
    fn test_insufficient_evidence_yields_no_row() {
        let base = baseline(&[&[("28079", 3, 20.0)], &[], &[]]);
        let rows = score(&day(12, &[("28079", 3, 500.0)]), &base);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_inner_join_drops_one_sided_keys() {
        let base = baseline(&[
            &[("28079", 8, 10.0), ("28006", 8, 10.0)],
            &[("28079", 8, 10.0), ("28006", 8, 10.0)],
            &[("28079", 8, 10.0), ("28006", 8, 10.0)],
        ]);
        let rows = score(&day(12, &[("28079", 8, 10.0), ("28123", 8, 5.0)]), &base);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].destination.as_str(), "28079");
    }

    #[test]
    fn test_zero_variance_scoring() {
        let base = baseline(&[
            &[("28079", 8, 40.0)],
            &[("28079", 8, 40.0)],
            &[("28079", 8, 40.0)],
        ]);

        let same = &score(&day(12, &[("28079", 8, 40.0)]), &base)[0];
        assert_eq!(same.z, 0.0);
        assert!(!same.significant);

        let above = &score(&day(12, &[("28079", 8, 40.5)]), &base)[0];
        assert_eq!(above.ci_high, 40.0);
        assert_eq!(above.z, 0.0);
        assert!(above.significant);
    }

    #[test]
    fn test_zero_mean_has_zero_pct() {
        let base = baseline(&[
            &[("28079", 8, 0.0)],
            &[("28079", 8, 0.0)],
            &[("28079", 8, 0.0)],
        ]);
        let row = &score(&day(12, &[("28079", 8, 7.0)]), &base)[0];
        assert_eq!(row.diff_pct, 0.0);
        assert_eq!(row.diff_abs, 7.0);
    }

    #[test]
    fn test_ranking_and_summary() {
        let base = baseline(&[
            &[("28079", 8, 100.0), ("28006", 8, 10.0), ("28006", 9, 50.0)],
            &[("28079", 8, 110.0), ("28006", 8, 10.0), ("28006", 9, 50.0)],
            &[("28079", 8, 90.0), ("28006", 8, 10.0), ("28006", 9, 50.0)],
        ]);
        let rows = score(
            &day(12, &[("28079", 8, 150.0), ("28006", 8, 30.0), ("28006", 9, 20.0)]),
            &base,
        );

        let by_abs = top_n(&rows, Ranking::Absolute, 10);
        assert_eq!(by_abs[0].destination.as_str(), "28079");
        let by_pct = top_n(&rows, Ranking::Percent, 1);
        assert_eq!(by_pct.len(), 1);
        assert_eq!(by_pct[0].diff_pct, 200.0);

        let increases = significant_increases(&rows);
        assert_eq!(increases.len(), 2);

        let summary = ScoreSummary::from_rows(&rows);
        assert_eq!(summary.keys_scored, 3);
        assert_eq!(summary.keys_significant, 2);
        assert_eq!(summary.significant_increases, 2);
        assert_eq!(summary.destinations_affected, 2);
    }
}
