//! Rolling window statistics over series with gaps
//!
//! Every window here is *shifted*: the statistic reported at index `t`
//! is computed over `values[t - window .. t]`, never including `t` itself.

use crate::{MathError, Result};
use statrs::statistics::Statistics;

/// Statistic computed over a rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollingStat {
    Mean,
    Std,
    Min,
    Max,
}

impl RollingStat {
    /// All statistics in feature order
    pub const ALL: [RollingStat; 4] = [
        RollingStat::Mean,
        RollingStat::Std,
        RollingStat::Min,
        RollingStat::Max,
    ];

    /// Short name used in feature column names
    pub fn name(&self) -> &'static str {
        match self {
            RollingStat::Mean => "mean",
            RollingStat::Std => "std",
            RollingStat::Min => "min",
            RollingStat::Max => "max",
        }
    }

    fn apply(&self, window: &[f64]) -> Option<f64> {
        match self {
            RollingStat::Mean => Some(window.iter().mean()),
            // sample standard deviation, undefined below two points
            RollingStat::Std if window.len() < 2 => None,
            RollingStat::Std => Some(window.iter().std_dev()),
            RollingStat::Min => window.iter().copied().reduce(f64::min),
            RollingStat::Max => window.iter().copied().reduce(f64::max),
        }
    }
}

/// Compute a shifted rolling statistic.
///
/// The value at `t` uses the non-missing entries of
/// `values[t.saturating_sub(window) .. t]` and is `None` unless at least
/// `min_periods` of them are present.
pub fn shifted_rolling(
    values: &[Option<f64>],
    window: usize,
    min_periods: usize,
    stat: RollingStat,
) -> Result<Vec<Option<f64>>> {
    if window == 0 {
        return Err(MathError::InvalidInput(
            "Window size must be greater than zero".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(values.len());
    let mut buffer: Vec<f64> = Vec::with_capacity(window);
    for t in 0..values.len() {
        buffer.clear();
        buffer.extend(values[t.saturating_sub(window)..t].iter().flatten());
        if buffer.len() < min_periods.max(1) {
            out.push(None);
        } else {
            out.push(stat.apply(&buffer));
        }
    }
    Ok(out)
}

/// Fraction of missing entries among the `window` values preceding each index.
///
/// `None` at index 0, where there is no history at all.
pub fn shifted_null_fraction(values: &[Option<f64>], window: usize) -> Result<Vec<Option<f64>>> {
    if window == 0 {
        return Err(MathError::InvalidInput(
            "Window size must be greater than zero".to_string(),
        ));
    }

    Ok((0..values.len())
        .map(|t| {
            let slice = &values[t.saturating_sub(window)..t];
            if slice.is_empty() {
                None
            } else {
                let missing = slice.iter().filter(|v| v.is_none()).count();
                Some(missing as f64 / slice.len() as f64)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> Vec<Option<f64>> {
        vec![Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0)]
    }

    #[test]
    fn test_rolling_never_includes_current_value() {
        let values = series();
        let means = shifted_rolling(&values, 2, 1, RollingStat::Mean).unwrap();
        assert_eq!(means[0], None);
        assert_eq!(means[1], Some(1.0));
        assert_eq!(means[2], Some(1.5));
        // window [None, 4.0] at t = 4
        assert_eq!(means[4], Some(4.0));
        assert_eq!(means[5], Some(4.5));
    }

    #[test]
    fn test_rolling_min_periods() {
        let values = series();
        let maxes = shifted_rolling(&values, 3, 3, RollingStat::Max).unwrap();
        assert_eq!(maxes[3], None); // [1, 2, None] has two values
        assert_eq!(maxes[6 - 1], None); // [None, 4, 5]
        let mins = shifted_rolling(&values, 3, 2, RollingStat::Min).unwrap();
        assert_eq!(mins[3], Some(1.0));
    }

    #[test]
    fn test_rolling_std_is_sample_std() {
        let values = vec![Some(2.0), Some(4.0), Some(4.0), Some(4.0), Some(5.0)];
        let stds = shifted_rolling(&values, 10, 1, RollingStat::Std).unwrap();
        assert_eq!(stds[1], None);
        // sample std of [2, 4] = sqrt(2)
        assert!((stds[2].unwrap() - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_null_fraction() {
        let fractions = shifted_null_fraction(&series(), 4).unwrap();
        assert_eq!(fractions[0], None);
        assert_eq!(fractions[1], Some(0.0));
        assert_eq!(fractions[4], Some(0.25));
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(shifted_rolling(&series(), 0, 1, RollingStat::Mean).is_err());
        assert!(shifted_null_fraction(&series(), 0).is_err());
    }
}
