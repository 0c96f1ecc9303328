//! Sample statistics

use serde::{Deserialize, Serialize};

pub use accel_common::utils::finite_ratio;

/// Aggregate over a set of timing samples, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Number of samples
    pub count: usize,

    /// Arithmetic mean
    pub mean_ms: f64,

    /// Median
    pub median_ms: f64,

    /// 95th percentile, `sorted[floor(n * 0.95)]`
    pub p95_ms: f64,

    /// Fastest sample
    pub min_ms: f64,

    /// Slowest sample
    pub max_ms: f64,

    /// Sample standard deviation
    pub std_dev_ms: f64,
}

impl SampleStats {
    /// Computes statistics, ignoring non-finite samples
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite()).collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };

        Self {
            count: n,
            mean_ms: mean,
            median_ms: median_of_sorted(&sorted),
            p95_ms: percentile_of_sorted(&sorted, 0.95),
            min_ms: sorted[0],
            max_ms: sorted[n - 1],
            std_dev_ms: variance.sqrt(),
        }
    }
}

/// Median of an ascending slice; `0` when empty
pub fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Nearest-rank percentile at index `floor(n * q)`, clamped to the last sample
pub fn percentile_of_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Mean of the positive, finite values; `0` when there are none
pub fn mean_positive(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_over_known_samples() {
        let stats = SampleStats::from_samples(&[4.0, 1.0, 3.0, 2.0, 5.0]);
        assert_eq!(stats.count, 5);
        assert_eq!(stats.mean_ms, 3.0);
        assert_eq!(stats.median_ms, 3.0);
        assert_eq!(stats.p95_ms, 5.0);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 5.0);
        assert!((stats.std_dev_ms - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_p95_index_is_floor_of_n() {
        let samples: Vec<f64> = (1..=20).map(f64::from).collect();
        // floor(20 * 0.95) = 19
        assert_eq!(percentile_of_sorted(&samples, 0.95), 20.0);
        let samples: Vec<f64> = (1..=10).map(f64::from).collect();
        // floor(10 * 0.95) = 9
        assert_eq!(percentile_of_sorted(&samples, 0.95), 10.0);
    }

    #[test]
    fn test_p95_never_below_median() {
        let mut seed = 0x2545_f491_4f6c_dd1du64;
        for n in 1..64 {
            let samples: Vec<f64> = (0..n)
                .map(|_| {
                    seed ^= seed << 13;
                    seed ^= seed >> 7;
                    seed ^= seed << 17;
                    (seed % 10_000) as f64 / 10.0
                })
                .collect();
            let stats = SampleStats::from_samples(&samples);
            assert!(stats.p95_ms >= stats.median_ms, "n={} {:?}", n, stats);
            assert!(stats.max_ms >= stats.p95_ms);
        }
    }

    #[test]
    fn test_empty_and_non_finite_samples() {
        assert_eq!(SampleStats::from_samples(&[]), SampleStats::default());
        let stats = SampleStats::from_samples(&[f64::NAN, 2.0, f64::INFINITY]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean_ms, 2.0);
        assert_eq!(stats.std_dev_ms, 0.0);
    }

    #[test]
    fn test_mean_positive_skips_zero_and_nan() {
        assert_eq!(mean_positive([2.0, 0.0, 4.0, f64::NAN]), 3.0);
        assert_eq!(mean_positive(Vec::new()), 0.0);
    }
}
