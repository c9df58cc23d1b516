use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::Registry;

use crate::builtin_metrics::MetricSet;
use crate::schedule::{RampSchedule, StageSnapshot};
use crate::scheduler::LiveUsers;

#[derive(Debug, Clone, PartialEq)]
pub struct LiveMetrics {
    pub requests_total: u64,
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,
    pub failed_requests_total: u64,
    pub checks_total: u64,
    pub checks_failed_total: u64,
    pub iterations_total: u64,
    /// Whole-run latency percentiles so far, in milliseconds.
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub active_vus: u64,
    pub target_vus: u64,
    pub stage: Option<StageSnapshot>,
    pub metrics: LiveMetrics,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

/// Builds one [`ProgressUpdate`] per call, keeping what it needs for per-interval rates.
pub(crate) struct ProgressTracker {
    registry: Arc<Registry>,
    metrics: Arc<MetricSet>,
    schedule: Arc<RampSchedule>,
    live: Arc<LiveUsers>,
    tick: u64,
    last_requests: u64,
    last_elapsed: Duration,
}

impl ProgressTracker {
    pub(crate) fn new(
        registry: Arc<Registry>,
        metrics: Arc<MetricSet>,
        schedule: Arc<RampSchedule>,
        live: Arc<LiveUsers>,
    ) -> Self {
        Self {
            registry,
            metrics,
            schedule,
            live,
            tick: 0,
            last_requests: 0,
            last_elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn update(&mut self, elapsed: Duration) -> ProgressUpdate {
        self.tick = self.tick.saturating_add(1);

        let requests_total = self.registry.query(self.metrics.http_reqs).sum_counter().sum as u64;
        let dt = elapsed.saturating_sub(self.last_elapsed).as_secs_f64();
        let rps_now = if dt > 0.0 {
            requests_total.saturating_sub(self.last_requests) as f64 / dt
        } else {
            0.0
        };
        self.last_requests = requests_total;
        self.last_elapsed = elapsed;

        let failed = self.registry.query(self.metrics.http_req_failed).sum_rate();
        let checks = self.registry.query(self.metrics.checks).sum_rate();
        let iterations = self.registry.query(self.metrics.iterations).sum_counter();
        let latency = self
            .registry
            .query(self.metrics.http_req_duration)
            .merge_trend()
            .ok();

        ProgressUpdate {
            tick: self.tick,
            elapsed,
            total_duration: self.schedule.total_duration(),
            active_vus: self.live.active(),
            target_vus: self.live.target(),
            stage: self.schedule.stage_snapshot_at(elapsed),
            metrics: LiveMetrics {
                requests_total,
                rps_now,
                failed_requests_total: failed.hits,
                checks_total: checks.total,
                checks_failed_total: checks.total.saturating_sub(checks.hits),
                iterations_total: iterations.sum as u64,
                latency_p50_ms: latency.as_ref().and_then(|d| d.percentile(50.0)),
                latency_p95_ms: latency.as_ref().and_then(|d| d.percentile(95.0)),
            },
        }
    }
}
