//! Utility functions for the acceleration runtime
//!
//! Timing helpers measure with `tokio::time::Instant` so that tests running
//! on a paused clock observe exact simulated latencies.

use std::future::Future;
use std::time::Duration;

use bytesize::ByteSize;
use tokio::time::{timeout, Instant};

use crate::error::{Error, Result};

/// Formats a byte size into a human-readable string
///
/// # Examples
///
/// ```
/// use accel_common::utils::format_bytes;
///
/// assert!(format_bytes(1024).contains("KiB"));
/// ```
pub fn format_bytes(bytes: u64) -> String {
    ByteSize::b(bytes).to_string_as(false)
}

/// Formats a duration into a human-readable string
///
/// # Examples
///
/// ```
/// use accel_common::utils::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs == 0 {
        let millis = duration.subsec_millis();
        if millis == 0 {
            return format!("{}µs", duration.subsec_micros());
        }
        return format!("{}ms", millis);
    }

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut result = String::new();
    if hours > 0 {
        result.push_str(&format!("{}h ", hours));
    }
    if minutes > 0 || !result.is_empty() {
        result.push_str(&format!("{}m ", minutes));
    }
    result.push_str(&format!("{}s", seconds));
    result
}

/// Executes a future with a timeout
///
/// An elapsed deadline is reported as [`Error::Timeout`] naming the operation.
pub async fn execute_with_timeout<T, F>(
    future: F,
    duration: Duration,
    operation_name: &str,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "Operation '{}' timed out after {}",
            operation_name,
            format_duration(duration)
        ))),
    }
}

/// Measures the execution time of an async operation
///
/// Unlike a `?`-propagating variant, the elapsed time is returned even when
/// the operation fails, so failed attempts still show up in timings.
pub async fn measure_async<T, F>(future: F) -> (Result<T>, Duration)
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = future.await;
    (result, start.elapsed())
}

/// Converts a duration into fractional milliseconds
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Divides two quantities, reporting `0` for any non-finite or negative outcome
///
/// # Examples
///
/// ```
/// use accel_common::utils::finite_ratio;
///
/// assert_eq!(finite_ratio(100.0, 10.0), 10.0);
/// assert_eq!(finite_ratio(100.0, 0.0), 0.0);
/// assert_eq!(finite_ratio(0.0, 0.0), 0.0);
/// ```
pub fn finite_ratio(numerator: f64, denominator: f64) -> f64 {
    let ratio = numerator / denominator;
    if ratio.is_finite() && ratio >= 0.0 {
        ratio
    } else {
        0.0
    }
}

/// Clamps a value into `[0, 1]`, mapping NaN to `0`
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Returns the number of logical CPU cores available
pub fn logical_cpus() -> usize {
    num_cpus::get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_uses_binary_units() {
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(2 << 30), "2.0 GiB");
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn test_logical_cpus_is_positive() {
        assert!(logical_cpus() >= 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(42)), "42µs");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
        assert_eq!(format_duration(Duration::from_secs(7)), "7s");
    }

    #[test]
    fn test_finite_ratio_guards() {
        assert_eq!(finite_ratio(f64::INFINITY, 1.0), 0.0);
        assert_eq!(finite_ratio(f64::NAN, 1.0), 0.0);
        assert_eq!(finite_ratio(-5.0, 1.0), 0.0);
        assert!((finite_ratio(30.0, 10.0) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.4), 0.4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_timeout_elapses() {
        let result: Result<()> = execute_with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(100),
            "slow kernel",
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("slow kernel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_async_reports_failures_with_time() {
        let (result, elapsed) = measure_async(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<(), _>(Error::Runtime("boom".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(elapsed, Duration::from_millis(30));
    }
}
