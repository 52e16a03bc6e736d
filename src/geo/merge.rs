use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;

use crate::analysis::impact::ImpactRow;
use crate::types::{HOURS_PER_DAY, ZoneCode};

/// Dense hour-of-day value map. Always holds exactly 24 entries and
/// serializes with string keys `"0"` through `"23"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyMap([f64; HOURS_PER_DAY]);

impl HourlyMap {
    pub fn zeros() -> Self {
        Self([0.0; HOURS_PER_DAY])
    }

    /// Value for `hour`, or `None` outside `0..24`.
    pub fn get(&self, hour: usize) -> Option<f64> {
        self.0.get(hour).copied()
    }

    pub fn len(&self) -> usize {
        HOURS_PER_DAY
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.0.iter().copied().enumerate()
    }

    pub fn max(&self) -> f64 {
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    fn add(&mut self, hour: usize, value: f64) {
        self.0[hour] += value;
    }
}

impl Serialize for HourlyMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(HOURS_PER_DAY))?;
        for (hour, value) in self.iter() {
            map.serialize_entry(&hour.to_string(), &value)?;
        }
        map.end()
    }
}

/// Hourly series for every target geometry, in geometry order.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlySeries {
    pub zones: Vec<(ZoneCode, HourlyMap)>,
    /// Shared color-scale maximum across all zones and hours, never below 0.
    pub max_value: f64,
}

impl HourlySeries {
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn get(&self, zone: &ZoneCode) -> Option<&HourlyMap> {
        self.zones.iter().find(|(z, _)| z == zone).map(|(_, m)| m)
    }
}

/// Default selector: trips above the baseline mean, deficits clipped to zero.
pub fn excess_trips(row: &ImpactRow) -> f64 {
    row.diff_abs.max(0.0)
}

/// Spreads the selected value of each row over a dense hourly map per zone
/// and emits one map per entry of `geometry_ids`.
///
/// Ids with no matching rows (including ids whose width does not match the
/// zone codes) get an all-zero map, so the output always has exactly
/// `geometry_ids.len()` entries.
pub fn merge<F>(rows: &[ImpactRow], selector: F, geometry_ids: &[ZoneCode]) -> HourlySeries
where
    F: Fn(&ImpactRow) -> f64,
{
    let mut by_zone: HashMap<&ZoneCode, HourlyMap> = HashMap::new();
    for row in rows {
        let hour = row.period.hour();
        if hour >= HOURS_PER_DAY {
            continue;
        }
        by_zone
            .entry(&row.destination)
            .or_insert_with(HourlyMap::zeros)
            .add(hour, selector(row));
    }

    let zones: Vec<(ZoneCode, HourlyMap)> = geometry_ids
        .iter()
        .map(|id| {
            let hours = by_zone.get(id).copied().unwrap_or_else(HourlyMap::zeros);
            (id.clone(), hours)
        })
        .collect();

    let max_value = zones
        .iter()
        .map(|(_, hours)| hours.max())
        .fold(0.0, f64::max);

    HourlySeries { zones, max_value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Period;

    fn zone(raw: &str) -> ZoneCode {
        ZoneCode::padded(raw, 5)
    }

    fn row(dest: &str, hour: u8, diff_abs: f64) -> ImpactRow {
        ImpactRow {
            destination: zone(dest),
            period: Period(hour),
            observed: 100.0 + diff_abs,
            n: 3,
            mean: 100.0,
            std: 10.0,
            ci_low: 88.7,
            ci_high: 111.3,
            diff_abs,
            diff_pct: diff_abs,
            z: diff_abs / 10.0,
            significant: diff_abs > 11.3,
        }
    }

    #[test]
    fn test_every_geometry_gets_a_dense_map() {
        let rows = vec![row("28079", 8, 50.0), row("28079", 9, -20.0)];
        let ids = vec![zone("28079"), zone("28006"), zone("2807901")];
        let series = merge(&rows, excess_trips, &ids);

        assert_eq!(series.len(), 3);
        for (_, hours) in &series.zones {
            assert_eq!(hours.len(), 24);
            assert_eq!(hours.iter().count(), 24);
        }

        let madrid = series.get(&zone("28079")).unwrap();
        assert_eq!(madrid.get(8), Some(50.0));
        assert_eq!(madrid.get(9), Some(0.0));
        assert_eq!(series.get(&zone("28006")).unwrap().max(), 0.0);
        assert_eq!(series.max_value, 50.0);
    }

    #[test]
    fn test_rows_outside_the_geometry_set_are_ignored() {
        let rows = vec![row("28123", 3, 500.0), row("28079", 3, 5.0)];
        let series = merge(&rows, excess_trips, &[zone("28079")]);

        assert_eq!(series.len(), 1);
        assert_eq!(series.max_value, 5.0);
    }

    #[test]
    fn test_max_is_never_negative() {
        let rows = vec![row("28079", 3, -5.0)];
        let series = merge(&rows, |r| r.diff_abs, &[zone("28079")]);

        assert_eq!(series.get(&zone("28079")).unwrap().get(3), Some(-5.0));
        assert_eq!(series.max_value, 0.0);
    }

    #[test]
    fn test_hours_past_the_day_have_no_value() {
        let hours = HourlyMap::zeros();
        assert_eq!(hours.get(23), Some(0.0));
        assert_eq!(hours.get(24), None);
        assert_eq!(hours.get(usize::MAX), None);
    }

    #[test]
    fn test_hourly_map_serializes_all_hours_as_string_keys() {
        let series = merge(&[row("28079", 23, 1.5)], excess_trips, &[zone("28079")]);
        let json = serde_json::to_value(series.zones[0].1).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.len(), 24);
        for hour in 0..24 {
            assert!(obj.contains_key(&hour.to_string()));
        }
        assert_eq!(obj["23"], 1.5);
        assert_eq!(obj["0"], 0.0);
    }
}
