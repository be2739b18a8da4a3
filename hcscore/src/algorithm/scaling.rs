use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Compression constant of the logarithmic branch, `log(1 + k·v) / log(k)`.
pub const LOG_COMPRESSION: f64 = 100_000.0;

/// A column counts as right-skewed when `mean - min < SKEW_RATIO * (max - mean)`.
pub const SKEW_RATIO: f64 = 0.2;

/// Value every object receives when a column has no range (`max == min`).
pub const DEGENERATE_FILL: f32 = 0.5;

/// Summary statistics of a raw feature column, computed once before any scaling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureMetrics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMode {
    Linear,
    Logarithmic,
    /// Constant column, every value maps to [`DEGENERATE_FILL`].
    Degenerate,
}

impl FeatureMetrics {
    /// Metrics over the finite values of `values`, `None` if there are none.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        if min > max {
            return None;
        }

        let mean = Statistics::mean(values.iter().filter(|v| v.is_finite()));

        Some(FeatureMetrics { min, max, mean })
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.max > self.min)
    }

    pub fn mode(&self) -> ScaleMode {
        if self.is_degenerate() {
            ScaleMode::Degenerate
        } else if self.mean - self.min < SKEW_RATIO * (self.max - self.mean) {
            ScaleMode::Logarithmic
        } else {
            ScaleMode::Linear
        }
    }
}

pub fn min_max_scale(value: f64, min: f64, max: f64) -> f64 {
    (value - min) / (max - min)
}

pub fn log_compress(value: f64) -> f64 {
    (1.0 + LOG_COMPRESSION * value).ln() / LOG_COMPRESSION.ln()
}

/// Scale a single raw value into [0, 1] for the given column metrics.
///
/// Heavy-tailed columns (most mass near the minimum) get the logarithmic
/// branch on top of min-max scaling. The result is clamped so values at the
/// column boundary stay inside the unit interval; NaN input stays NaN.
pub fn adaptive_scale(value: f64, metrics: &FeatureMetrics) -> f32 {
    let scaled = match metrics.mode() {
        ScaleMode::Degenerate => return DEGENERATE_FILL,
        ScaleMode::Linear => min_max_scale(value, metrics.min, metrics.max),
        ScaleMode::Logarithmic => {
            // clamp first, ln(1 + k·v) is undefined below v = -1/k
            log_compress(min_max_scale(value, metrics.min, metrics.max).clamp(0.0, 1.0))
        }
    };

    if scaled.is_nan() {
        f32::NAN
    } else {
        scaled.clamp(0.0, 1.0) as f32
    }
}

pub fn adaptive_scale_column(values: &[f64], metrics: &FeatureMetrics) -> Vec<f32> {
    values.par_iter().map(|v| adaptive_scale(*v, metrics)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_from_values() {
        let metrics = FeatureMetrics::from_values(&[1.0, 2.0, 3.0, f64::NAN, 6.0]).unwrap();
        assert_eq!(metrics.min, 1.0);
        assert_eq!(metrics.max, 6.0);
        assert!((metrics.mean - 3.0).abs() < 1e-12);

        assert!(FeatureMetrics::from_values(&[]).is_none());
        assert!(FeatureMetrics::from_values(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_mode_selection() {
        // mean close to min relative to the tail => log branch
        let skewed = FeatureMetrics { min: 0.0, max: 100.0, mean: 5.0 };
        assert_eq!(skewed.mode(), ScaleMode::Logarithmic);

        let balanced = FeatureMetrics { min: 0.0, max: 100.0, mean: 50.0 };
        assert_eq!(balanced.mode(), ScaleMode::Linear);

        let flat = FeatureMetrics { min: 3.0, max: 3.0, mean: 3.0 };
        assert_eq!(flat.mode(), ScaleMode::Degenerate);
    }

    #[test]
    fn test_scaled_values_in_unit_interval() {
        let values: Vec<f64> = (0..1000).map(|i| (i as f64).powi(8)).collect();
        let metrics = FeatureMetrics::from_values(&values).unwrap();
        assert_eq!(metrics.mode(), ScaleMode::Logarithmic);

        let scaled = adaptive_scale_column(&values, &metrics);
        assert!(scaled.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(scaled[0], 0.0);
        assert_eq!(scaled[999], 1.0);
    }

    #[test]
    fn test_adaptive_scale_is_monotonic() {
        for metrics in [
            FeatureMetrics { min: -2.0, max: 8.0, mean: 3.0 },
            FeatureMetrics { min: 0.0, max: 1000.0, mean: 10.0 },
        ] {
            let mut previous = f32::NEG_INFINITY;
            for i in 0..=200 {
                let value = metrics.min + (metrics.max - metrics.min) * i as f64 / 200.0;
                let scaled = adaptive_scale(value, &metrics);
                assert!(scaled >= previous);
                previous = scaled;
            }
        }
    }

    #[test]
    fn test_degenerate_column_fills_mid_range() {
        let values = vec![4.2; 10];
        let metrics = FeatureMetrics::from_values(&values).unwrap();
        assert!(metrics.is_degenerate());
        let scaled = adaptive_scale_column(&values, &metrics);
        assert!(scaled.iter().all(|v| *v == DEGENERATE_FILL));
    }
}
