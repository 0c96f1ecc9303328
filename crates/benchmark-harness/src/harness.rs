//! Benchmark harness implementation
//!
//! Runs warmup and timed iterations of every workload on the baseline path
//! once and then on each requested backend, aggregates the samples, and
//! ranks the backends into a recommended configuration.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use accel_common::utils::{clamp_unit, duration_ms, execute_with_timeout, finite_ratio, measure_async};
use accel_common::{Backend, Error, OptimizationLevel, Result};
use accel_config::{BackendPreference, BenchmarkSuiteOptions};
use acceleration_dispatcher::{AccelerationDispatcher, AccelerationEvent, DispatcherState};
use capability_probe::CapabilityDescriptor;

use crate::report::{
    BackendRanking, BackendReport, ComprehensiveBenchmarkResult, OperationReport, RecommendedConfig, StressReport,
};
use crate::stats::{mean_positive, SampleStats};
use crate::workloads::{standard_workloads, stress_operation, BenchmarkCategory, BenchmarkOperation};

/// Average speedup that maps to full confidence
pub const CONFIDENCE_NORMALIZER: f64 = 5.0;

/// Weight of tensor speedup in the backend score
pub const TENSOR_WEIGHT: f64 = 0.5;

/// Success rate a stress level must exceed to count as stable
pub const STABILITY_THRESHOLD: f64 = 0.95;

/// Drives benchmark runs against a dispatcher
pub struct BenchmarkHarness {
    /// Dispatcher whose backends are measured
    dispatcher: Arc<AccelerationDispatcher>,

    /// Workloads replacing the standard set
    workloads: Option<Vec<BenchmarkOperation>>,
}

struct Progress {
    completed: usize,
    total: usize,
}

impl BenchmarkHarness {
    /// Creates a harness over an initialized dispatcher
    pub fn new(dispatcher: Arc<AccelerationDispatcher>) -> Self {
        Self {
            dispatcher,
            workloads: None,
        }
    }

    /// Replaces the standard workloads
    pub fn with_workloads(mut self, workloads: Vec<BenchmarkOperation>) -> Self {
        self.workloads = Some(workloads);
        self
    }

    /// Dispatcher being measured
    pub fn dispatcher(&self) -> &Arc<AccelerationDispatcher> {
        &self.dispatcher
    }

    /// Runs the suite and produces a ranked report
    ///
    /// Iteration failures lower success rates; they never abort the run.
    pub async fn run(&self, options: &BenchmarkSuiteOptions) -> Result<ComprehensiveBenchmarkResult> {
        options.validate()?;
        let capabilities = match self.dispatcher.state() {
            DispatcherState::Disposed => {
                return Err(Error::Disposed("cannot benchmark a disposed dispatcher".to_string()))
            }
            _ => self
                .dispatcher
                .capabilities()
                .ok_or_else(|| Error::InitFailed("benchmark requires an initialized dispatcher".to_string()))?,
        };

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        let workloads = self
            .workloads
            .clone()
            .unwrap_or_else(|| standard_workloads(options));
        let backends = self.selectable_backends(&options.backends);
        let stress_levels = if options.include_stress {
            options.concurrency_levels.clone()
        } else {
            Vec::new()
        };

        info!(
            "Starting benchmark run {} with {} workloads on {:?}",
            id,
            workloads.len(),
            backends
        );

        let mut progress = Progress {
            completed: 0,
            total: workloads.len() * (backends.len() + 1) + stress_levels.len() * backends.len(),
        };

        let mut baseline = Vec::with_capacity(workloads.len());
        for workload in &workloads {
            baseline.push(self.measure(workload, None, None).await);
            self.report_progress(None, workload.category, &mut progress);
        }

        let mut reports = Vec::with_capacity(backends.len());
        for &backend in &backends {
            info!(backend = %backend, "Benchmarking backend");

            let mut operations = Vec::with_capacity(workloads.len());
            for (workload, base) in workloads.iter().zip(&baseline) {
                operations.push(self.measure(workload, Some(backend), base.success_mean_ms).await);
                self.report_progress(Some(backend), workload.category, &mut progress);
            }

            let mut stress = Vec::with_capacity(stress_levels.len());
            for &level in &stress_levels {
                stress.push(self.stress(backend, level, options.timeout()).await);
                self.report_progress(Some(backend), BenchmarkCategory::Stress, &mut progress);
            }

            reports.push(summarize(backend, operations, stress));
        }

        let ranking = determine_best_backend(&reports);
        let best_backend = ranking.iter().find(|r| r.score > 0.0).map(|r| r.backend);
        let recommendation = generate_recommended_config(best_backend, &reports, &capabilities);

        let duration = started.elapsed();
        info!(
            "Benchmark run {} finished in {:?}, best backend {:?}, confidence {:.2}",
            id, duration, best_backend, recommendation.confidence
        );

        Ok(ComprehensiveBenchmarkResult {
            id,
            started_at,
            duration_ms: duration_ms(duration),
            capabilities: (*capabilities).clone(),
            options: options.clone(),
            baseline,
            backends: reports,
            ranking,
            best_backend,
            recommendation,
        })
    }

    /// Requested backends the dispatcher can run, deduplicated
    fn selectable_backends(&self, requested: &[Backend]) -> Vec<Backend> {
        let available = self.dispatcher.available_backends();
        let mut selected = Vec::with_capacity(requested.len());
        for &backend in requested {
            if selected.contains(&backend) {
                continue;
            }
            if available.contains(&backend) {
                selected.push(backend);
            } else {
                warn!(backend = %backend, "Skipping backend that is not available on this host");
            }
        }
        selected
    }

    async fn execute_once(&self, workload: &BenchmarkOperation, backend: Option<Backend>) -> (Result<()>, Duration) {
        let op = &workload.operation;
        measure_async(execute_with_timeout(
            async move {
                match backend {
                    Some(backend) => self.dispatcher.execute_on(backend, op).await.map(|_| ()),
                    None => self.dispatcher.execute_baseline(op).await.map(|_| ()),
                }
            },
            workload.timeout,
            &workload.name,
        ))
        .await
    }

    async fn measure(
        &self,
        workload: &BenchmarkOperation,
        backend: Option<Backend>,
        baseline_mean_ms: Option<f64>,
    ) -> OperationReport {
        for _ in 0..workload.warmup_iterations {
            let _ = self.execute_once(workload, backend).await;
        }

        let mut samples_ms = Vec::with_capacity(workload.iterations);
        let mut success_samples_ms = Vec::with_capacity(workload.iterations);
        let mut errors: Vec<String> = Vec::new();
        for _ in 0..workload.iterations {
            let (outcome, elapsed) = self.execute_once(workload, backend).await;
            let elapsed_ms = duration_ms(elapsed);
            samples_ms.push(elapsed_ms);
            match outcome {
                Ok(()) => success_samples_ms.push(elapsed_ms),
                Err(e) => {
                    debug!("Iteration of {} failed: {}", workload.name, e);
                    let message = e.to_string();
                    if !errors.contains(&message) {
                        errors.push(message);
                    }
                }
            }
        }

        // Failed iterations stay in the samples but never count toward speed
        let stats = SampleStats::from_samples(&samples_ms);
        let success_rate = clamp_unit(finite_ratio(
            success_samples_ms.len() as f64,
            workload.iterations as f64,
        ));
        let success_mean_ms = (!success_samples_ms.is_empty())
            .then(|| SampleStats::from_samples(&success_samples_ms).mean_ms);
        let speedup = match (baseline_mean_ms, success_mean_ms) {
            (Some(baseline), Some(mean)) => finite_ratio(baseline, mean),
            _ => 0.0,
        };
        let throughput_mb_s = (workload.category == BenchmarkCategory::Memory).then(|| {
            let megabytes = workload.operation.memory_footprint_bytes() as f64 / 1_000_000.0;
            success_mean_ms.map_or(0.0, |mean| finite_ratio(megabytes, mean / 1000.0))
        });

        debug!(
            backend = ?backend,
            "{}: mean {:.3}ms p95 {:.3}ms success {:.2} speedup {:.2}",
            workload.name,
            stats.mean_ms,
            stats.p95_ms,
            success_rate,
            speedup
        );

        OperationReport {
            name: workload.name.clone(),
            category: workload.category,
            samples_ms,
            stats,
            success_rate,
            success_mean_ms,
            baseline_mean_ms,
            speedup,
            throughput_mb_s,
            errors,
        }
    }

    /// Launches `concurrency` operations at once and settles all of them
    async fn stress(&self, backend: Backend, concurrency: usize, timeout: Duration) -> StressReport {
        let started = Instant::now();
        let handles: Vec<JoinHandle<Result<()>>> = (0..concurrency)
            .map(|_| {
                let dispatcher = Arc::clone(&self.dispatcher);
                let op = stress_operation();
                tokio::spawn(async move {
                    execute_with_timeout(dispatcher.execute_on(backend, &op), timeout, "stress operation")
                        .await
                        .map(|_| ())
                })
            })
            .collect();

        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut crashed = false;
        for outcome in join_all(handles).await {
            match outcome {
                Ok(Ok(())) => completed += 1,
                Ok(Err(e)) => {
                    debug!(backend = %backend, "Stress operation failed: {}", e);
                    failed += 1;
                }
                Err(e) => {
                    if e.is_panic() {
                        warn!(backend = %backend, "Stress operation panicked");
                        crashed = true;
                    }
                    failed += 1;
                }
            }
        }

        let success_rate = clamp_unit(finite_ratio(completed as f64, concurrency as f64));
        StressReport {
            concurrency,
            completed,
            failed,
            success_rate,
            crashed,
            memory_stable: success_rate > STABILITY_THRESHOLD && !crashed,
            total_time_ms: duration_ms(started.elapsed()),
        }
    }

    fn report_progress(&self, backend: Option<Backend>, category: BenchmarkCategory, progress: &mut Progress) {
        progress.completed += 1;
        self.dispatcher.notify(AccelerationEvent::BenchmarkProgress {
            backend,
            category: category.to_string(),
            completed: progress.completed,
            total: progress.total,
        });
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn summarize(backend: Backend, operations: Vec<OperationReport>, stress: Vec<StressReport>) -> BackendReport {
    let speedup_of = |category: BenchmarkCategory| {
        mean(
            operations
                .iter()
                .filter(|op| op.category == category)
                .map(|op| op.speedup),
        )
    };
    let inference_speedup = speedup_of(BenchmarkCategory::Inference);
    let tensor_speedup = speedup_of(BenchmarkCategory::TensorOps);
    let memory_throughput_mb_s = mean(operations.iter().filter_map(|op| op.throughput_mb_s));

    let (succeeded, attempted) = if operations.is_empty() {
        stress
            .iter()
            .fold((0.0, 0.0), |(s, a), level| (s + level.completed as f64, a + level.concurrency as f64))
    } else {
        operations.iter().fold((0.0, 0.0), |(s, a), op| {
            let n = op.samples_ms.len() as f64;
            (s + op.success_rate * n, a + n)
        })
    };

    BackendReport {
        backend,
        operations,
        stress,
        inference_speedup,
        tensor_speedup,
        memory_throughput_mb_s,
        success_rate: clamp_unit(finite_ratio(succeeded, attempted)),
    }
}

/// Ranks backends by `inference_speedup * success_rate + tensor_speedup * 0.5`
///
/// Ties keep backend priority order.
pub fn determine_best_backend(reports: &[BackendReport]) -> Vec<BackendRanking> {
    let mut ranking: Vec<BackendRanking> = reports
        .iter()
        .map(|report| {
            let score = report.inference_speedup * report.success_rate + report.tensor_speedup * TENSOR_WEIGHT;
            BackendRanking {
                backend: report.backend,
                score: if score.is_finite() { score.max(0.0) } else { 0.0 },
            }
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.backend.priority().cmp(&b.backend.priority()))
    });
    ranking
}

/// Derives a configuration from the best backend's average speedup
pub fn generate_recommended_config(
    best: Option<Backend>,
    reports: &[BackendReport],
    capabilities: &CapabilityDescriptor,
) -> RecommendedConfig {
    let average_speedup = best
        .and_then(|backend| reports.iter().find(|r| r.backend == backend))
        .map(|report| mean_positive([report.inference_speedup, report.tensor_speedup]))
        .unwrap_or(0.0);

    let optimization_level = if average_speedup >= 2.5 {
        OptimizationLevel::O3
    } else if average_speedup >= 1.5 {
        OptimizationLevel::O2
    } else {
        OptimizationLevel::O1
    };

    RecommendedConfig {
        backend: best.map(BackendPreference::Specific).unwrap_or_default(),
        memory_limit_mb: (capabilities.max_memory_mb() / 2).max(1),
        enable_simd: capabilities.simd,
        optimization_level,
        average_speedup,
        confidence: clamp_unit(average_speedup / CONFIDENCE_NORMALIZER),
    }
}
