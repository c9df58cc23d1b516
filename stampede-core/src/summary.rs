use std::time::Duration;

use stampede_metrics::{MetricKind, MetricSeriesSummary, MetricValue, Registry};

use crate::error::Result;
use crate::scheduler::SchedulerReport;
use crate::signal::AbortReason;
use crate::thresholds_eval::ThresholdVerdict;

/// Value of one metric across all of its series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub value: MetricValue,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub name: String,
    /// Sorted by name.
    pub metrics: Vec<MetricSnapshot>,
    pub series: Vec<MetricSeriesSummary>,
    pub thresholds: Vec<ThresholdVerdict>,
    pub overall_pass: bool,
    pub elapsed: Duration,
    pub iterations: u64,
    pub aborted: Option<AbortReason>,
    pub scheduler: SchedulerReport,
}

impl RunResult {
    pub fn metric(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdVerdict> {
        self.thresholds.iter().filter(|v| !v.passed)
    }

    /// Whether an `abort_on_fail` threshold ended the run.
    pub fn aborted_by_threshold(&self) -> bool {
        matches!(self.aborted, Some(AbortReason::Threshold { .. }))
    }
}

/// Per-metric values with every series merged. Metrics without samples are left out.
pub fn metric_snapshots(registry: &Registry) -> Result<Vec<MetricSnapshot>> {
    let mut out = Vec::new();
    for id in registry.metric_ids() {
        let (Some(name), Some(kind)) = (registry.name(id), registry.kind(id)) else {
            continue;
        };
        let Some(value) = registry.query(id).value()? else {
            continue;
        };
        if value.samples() == 0 {
            continue;
        }
        out.push(MetricSnapshot {
            name: name.to_string(),
            kind,
            value,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Passes only when every threshold held and no threshold aborted the run.
pub fn overall_pass(thresholds: &[ThresholdVerdict], aborted: Option<&AbortReason>) -> bool {
    thresholds.iter().all(|v| v.passed) && !matches!(aborted, Some(AbortReason::Threshold { .. }))
}
