//! Field normalization for raw origin-destination rows.
//!
//! Every function here fails soft: bad input maps to a sentinel or default
//! value so a single row can never abort a day's aggregation.

use crate::types::{Period, ZoneCode};

/// Integral floats at or above 2^53 may already have been rounded.
const MAX_EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A normalized value plus whether the raw input was usable as-is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized<T> {
    pub value: T,
    pub clean: bool,
}

/// Parses `raw` as an integer and renders it zero-padded to `width`.
///
/// Floats with no fractional part (`"28079.0"`) are accepted. Anything else
/// yields [`ZoneCode::invalid`].
pub fn normalize_zone(raw: &str, width: usize) -> ZoneCode {
    match parse_integer(raw.trim()) {
        Some(n) => ZoneCode::padded(&n.to_string(), width),
        None => ZoneCode::invalid(),
    }
}

/// Parses an hour in `0..=max_period`. Unusable input becomes hour 0 and is
/// flagged as not clean.
pub fn normalize_period(raw: &str, max_period: u8) -> Normalized<Period> {
    match parse_integer(raw.trim()) {
        Some(n) if n <= u64::from(max_period) => Normalized {
            value: Period(n as u8),
            clean: true,
        },
        _ => Normalized {
            value: Period::default(),
            clean: false,
        },
    }
}

/// Parses a trip count as published by the source.
///
/// Without a decimal comma the value is an integer and every `.` is a
/// thousands separator (`"8.013"` is 8013). With a decimal comma, `.` is
/// still a thousands separator and `,` is the decimal point (`"1.234,5"` is
/// 1234.5). Unparsable, non-finite and negative values become `0.0`.
pub fn normalize_volume(raw: &str) -> f64 {
    let raw = raw.trim();
    let parsed = if raw.contains(',') {
        raw.replace('.', "").replace(',', ".").parse::<f64>().ok()
    } else {
        raw.replace('.', "").parse::<u64>().ok().map(|n| n as f64)
    };

    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => 0.0,
    }
}

fn parse_integer(raw: &str) -> Option<u64> {
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    let f = raw.parse::<f64>().ok()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < MAX_EXACT_FLOAT_INTEGER {
        Some(f as u64)
    } else {
        None
    }
}
