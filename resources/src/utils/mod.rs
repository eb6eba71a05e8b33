//! Numeric helpers shared by the planner and the simulator.
//!
//! All recommendation arithmetic runs on `f64`. Rounding is ordinary
//! half-up (half away from zero), not the IEEE round-half-to-even the
//! standard library uses, so repeated runs reproduce the same plan
//! boundaries.

/// Round `value` to `digits` decimal places, halves away from zero.
pub fn round_half_up(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(digits as i32);
    let scaled = value * factor;
    if scaled >= 0.0 {
        (scaled + 0.5).floor() / factor
    } else {
        (scaled - 0.5).ceil() / factor
    }
}

/// Quantile with linear interpolation between closest ranks.
///
/// `q` is a fraction in `[0, 1]`. Returns NaN for an empty slice. NaN
/// inputs are ignored.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN values"));
    let q = q.clamp(0.0, 1.0);
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
    }
}

/// Percentile in `[0, 100]`, same interpolation as [`quantile`].
pub fn percentile(values: &[f64], p: f64) -> f64 {
    quantile(values, p / 100.0)
}

/// Maximum over an iterator, skipping NaN. NaN when nothing remains.
pub fn nan_max(values: impl IntoIterator<Item = f64>) -> f64 {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}

/// Minimum over an iterator, skipping NaN. NaN when nothing remains.
pub fn nan_min(values: impl IntoIterator<Item = f64>) -> f64 {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
}

/// Arithmetic mean. NaN for an empty iterator.
pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Sample standard deviation (ddof = 1). Zero for fewer than two values.
pub fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values.iter().copied());
    let var = values.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>()
        / (values.len() - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_up_rounding() {
        assert_eq!(round_half_up(0.125, 2), 0.13);
        assert_eq!(round_half_up(0.135, 2), 0.14);
        assert_eq!(round_half_up(2.5, 0), 3.0);
        assert_eq!(round_half_up(-2.5, 0), -3.0);
        assert_eq!(round_half_up(1.2344, 3), 1.234);
        assert!(round_half_up(f64::INFINITY, 2).is_infinite());
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 4.0);
        assert_eq!(quantile(&values, 0.5), 2.5);
        assert_eq!(percentile(&values, 25.0), 1.75);
    }

    #[test]
    fn quantile_of_empty_is_nan() {
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn nan_extrema_skip_nan() {
        assert_eq!(nan_max([1.0, f64::NAN, 3.0]), 3.0);
        assert_eq!(nan_min([1.0, f64::NAN, 3.0]), 1.0);
        assert!(nan_max([f64::NAN]).is_nan());
    }

    #[test]
    fn stddev_of_single_value_is_zero() {
        assert_eq!(sample_stddev(&[4.2]), 0.0);
        let spread = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((sample_stddev(&spread) - 2.138089935).abs() < 1e-6);
    }
}
