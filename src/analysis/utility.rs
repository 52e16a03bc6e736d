/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the sample standard deviation (n - 1 denominator) given a
/// pre-computed mean. Returns 0.0 when fewer than two values are given.
pub fn sample_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;

    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[100.0, 110.0, 90.0]), 100.0);
    }

    #[test]
    fn test_sample_stddev() {
        assert_eq!(sample_stddev(&[100.0, 110.0, 90.0], 100.0), 10.0);
        assert_eq!(sample_stddev(&[20.0], 20.0), 0.0);
        assert_eq!(sample_stddev(&[], 0.0), 0.0);
    }
}
