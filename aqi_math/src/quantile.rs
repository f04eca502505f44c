//! Percentiles and winsorization
//!
//! Percentiles use linear interpolation between closest ranks, so
//! `percentile(v, 0.5)` of an even-length slice is the mean of the two
//! middle values.

use crate::{MathError, Result};

/// Inclusive clipping bounds derived from a pair of percentiles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    /// Clip a single value into the bounds
    pub fn clip(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }

    /// Clip every value of a slice
    pub fn clip_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.clip(v)).collect()
    }
}

/// Linear-interpolated percentile of `values` at fraction `p` in [0, 1].
///
/// Non-finite values are ignored.
pub fn percentile(values: &[f64], p: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&p) {
        return Err(MathError::InvalidInput(format!(
            "Percentile fraction must be within [0, 1], got {}",
            p
        )));
    }

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot compute a percentile of an empty slice".to_string(),
        ));
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    Ok(interpolate_sorted(&sorted, p))
}

fn interpolate_sorted(sorted: &[f64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Compute the (`low`, `high`) percentile bounds of the finite values
pub fn quantile_bounds(values: &[f64], low: f64, high: f64) -> Result<Bounds> {
    if low > high {
        return Err(MathError::InvalidInput(format!(
            "Lower percentile {} exceeds upper percentile {}",
            low, high
        )));
    }

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot compute bounds of an empty slice".to_string(),
        ));
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    Ok(Bounds {
        lower: interpolate_sorted(&sorted, low),
        upper: interpolate_sorted(&sorted, high),
    })
}

/// Winsorize a dense slice at the given percentiles.
///
/// Returns the input unchanged when it holds no finite values.
pub fn winsorize(values: &[f64], low: f64, high: f64) -> Result<Vec<f64>> {
    match quantile_bounds(values, low, high) {
        Ok(bounds) => Ok(values
            .iter()
            .map(|&v| if v.is_finite() { bounds.clip(v) } else { v })
            .collect()),
        Err(MathError::InsufficientData(_)) => Ok(values.to_vec()),
        Err(e) => Err(e),
    }
}

/// Winsorize a slice with missing entries; `None` stays `None`.
pub fn winsorize_options(values: &[Option<f64>], low: f64, high: f64) -> Result<Vec<Option<f64>>> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    match quantile_bounds(&present, low, high) {
        Ok(bounds) => Ok(values.iter().map(|v| v.map(|x| bounds.clip(x))).collect()),
        Err(MathError::InsufficientData(_)) => Ok(values.to_vec()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_matches_linear_interpolation() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 0.0).unwrap() - 1.0).abs() < 1e-12);
        assert!((percentile(&values, 1.0).unwrap() - 4.0).abs() < 1e-12);
        // pos = 0.9 * 3 = 2.7 -> 3 + 0.7
        assert!((percentile(&values, 0.9).unwrap() - 3.7).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_rejects_bad_input() {
        assert!(percentile(&[], 0.5).is_err());
        assert!(percentile(&[1.0], 1.5).is_err());
        assert!(percentile(&[f64::NAN], 0.5).is_err());
    }

    #[test]
    fn test_winsorize_clips_extremes() {
        let mut values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        values[99] = 10_000.0;
        let clipped = winsorize(&values, 0.01, 0.99).unwrap();
        assert!(clipped[99] < 10_000.0);
        assert!(clipped[0] > 0.0);
        assert_eq!(clipped[50], 50.0);
    }

    #[test]
    fn test_clip_with_fixed_bounds_is_idempotent() {
        let values = vec![-50.0, 3.0, 7.5, 12.0, 400.0, 42.0];
        let bounds = quantile_bounds(&values, 0.1, 0.9).unwrap();
        let once = bounds.clip_all(&values);
        let twice = bounds.clip_all(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_winsorize_options_keeps_missing() {
        let values = vec![Some(1.0), None, Some(100.0), Some(2.0), None];
        let out = winsorize_options(&values, 0.0, 0.5).unwrap();
        assert_eq!(out[1], None);
        assert_eq!(out[4], None);
        assert_eq!(out[2], Some(2.0));
    }

    #[test]
    fn test_winsorize_all_missing_is_noop() {
        let values: Vec<Option<f64>> = vec![None, None];
        assert_eq!(winsorize_options(&values, 0.01, 0.99).unwrap(), values);
    }
}
