//! Dispatch counters

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use accel_common::utils::duration_ms;

/// Snapshot of dispatch outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchMetrics {
    /// Calls completed on a backend
    pub accelerated: u64,

    /// Calls that fell back after a backend problem
    pub fallbacks: u64,

    /// Calls routed straight to the baseline path
    pub baseline_only: u64,

    /// Calls that returned an error
    pub failures: u64,

    /// Mean compute time of successful calls
    pub mean_compute_time_ms: f64,
}

/// Accumulates [`DispatchMetrics`]
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<(DispatchMetrics, u64)>,
}

impl MetricsRecorder {
    fn record_time(metrics: &mut DispatchMetrics, samples: &mut u64, elapsed: Duration) {
        *samples += 1;
        let n = *samples as f64;
        metrics.mean_compute_time_ms += (duration_ms(elapsed) - metrics.mean_compute_time_ms) / n;
    }

    /// Records a call served by a backend
    pub fn record_accelerated(&self, elapsed: Duration) {
        let mut guard = self.inner.lock();
        let (metrics, samples) = &mut *guard;
        metrics.accelerated += 1;
        Self::record_time(metrics, samples, elapsed);
    }

    /// Records a call served by the baseline after a backend problem
    pub fn record_fallback(&self, elapsed: Duration) {
        let mut guard = self.inner.lock();
        let (metrics, samples) = &mut *guard;
        metrics.fallbacks += 1;
        Self::record_time(metrics, samples, elapsed);
    }

    /// Records a call routed directly to the baseline
    pub fn record_baseline(&self, elapsed: Duration) {
        let mut guard = self.inner.lock();
        let (metrics, samples) = &mut *guard;
        metrics.baseline_only += 1;
        Self::record_time(metrics, samples, elapsed);
    }

    /// Records a failed call
    pub fn record_failure(&self) {
        self.inner.lock().0.failures += 1;
    }

    /// Current values
    pub fn snapshot(&self) -> DispatchMetrics {
        self.inner.lock().0.clone()
    }

    /// Resets every counter
    pub fn reset(&self) {
        *self.inner.lock() = (DispatchMetrics::default(), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let recorder = MetricsRecorder::default();
        recorder.record_accelerated(Duration::from_millis(10));
        recorder.record_fallback(Duration::from_millis(30));
        recorder.record_failure();

        let metrics = recorder.snapshot();
        assert_eq!(metrics.accelerated, 1);
        assert_eq!(metrics.fallbacks, 1);
        assert_eq!(metrics.failures, 1);
        assert!((metrics.mean_compute_time_ms - 20.0).abs() < 1e-9);

        recorder.reset();
        assert_eq!(recorder.snapshot(), DispatchMetrics::default());
    }
}
