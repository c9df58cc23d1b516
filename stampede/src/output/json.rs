use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use stampede_metrics::MetricValue;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _plan: &stampede_core::Plan) {}

    fn progress(&self) -> Option<stampede_core::ProgressFn> {
        Some(Arc::new(move |u: stampede_core::ProgressUpdate| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, result: &stampede_core::RunResult) -> anyhow::Result<()> {
        let line = build_summary_line(result);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_duration_secs: f64,
    pub active_vus: u64,
    pub target_vus: u64,
    pub stage: Option<usize>,
    pub stages: Option<usize>,

    pub requests_per_sec: f64,
    pub total_requests: u64,
    pub failed_requests_total: u64,
    pub checks_total: u64,
    pub checks_failed_total: u64,
    pub iterations_total: u64,

    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
}

fn build_progress_line(u: &stampede_core::ProgressUpdate) -> JsonProgressLine {
    let m = &u.metrics;
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_duration_secs: u.total_duration.as_secs_f64(),
        active_vus: u.active_vus,
        target_vus: u.target_vus,
        stage: u.stage.as_ref().map(|s| s.index + 1),
        stages: u.stage.as_ref().map(|s| s.count),

        requests_per_sec: m.rps_now,
        total_requests: m.requests_total,
        failed_requests_total: m.failed_requests_total,
        checks_total: m.checks_total,
        checks_failed_total: m.checks_failed_total,
        iterations_total: m.iterations_total,

        latency_p50_ms: m.latency_p50_ms,
        latency_p95_ms: m.latency_p95_ms,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub name: String,
    pub elapsed_secs: f64,
    pub iterations: u64,
    pub ended_by: String,
    pub aborted: Option<String>,
    pub overall_pass: bool,
    pub vus: JsonVus,
    pub metrics: BTreeMap<String, JsonMetricValue>,
    pub thresholds: Vec<JsonThreshold>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonVus {
    pub peak: u64,
    pub spawned: u64,
    pub retired: u64,
    pub script_failures: u64,
    pub panicked: u64,
    pub abandoned: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonMetricValue {
    Counter {
        sum: f64,
        count: u64,
    },
    Rate {
        rate: Option<f64>,
        hits: u64,
        total: u64,
    },
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

impl From<&MetricValue> for JsonMetricValue {
    fn from(value: &MetricValue) -> Self {
        match value {
            MetricValue::Counter { sum, count } => Self::Counter {
                sum: *sum,
                count: *count,
            },
            MetricValue::Rate { total, hits, rate } => Self::Rate {
                rate: *rate,
                hits: *hits,
                total: *total,
            },
            MetricValue::Trend(t) => Self::Trend {
                count: t.count,
                min: t.min,
                max: t.max,
                avg: t.mean,
                med: t.p50,
                p90: t.p90,
                p95: t.p95,
                p99: t.p99,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
}

fn build_summary_line(result: &stampede_core::RunResult) -> JsonSummaryLine {
    let s = &result.scheduler;

    JsonSummaryLine {
        kind: "summary",
        name: result.name.clone(),
        elapsed_secs: result.elapsed.as_secs_f64(),
        iterations: result.iterations,
        ended_by: s.ended_by.to_string(),
        aborted: result.aborted.as_ref().map(ToString::to_string),
        overall_pass: result.overall_pass,
        vus: JsonVus {
            peak: s.peak_active,
            spawned: s.spawned,
            retired: s.retired,
            script_failures: s.script_failures,
            panicked: s.panicked,
            abandoned: s.abandoned,
        },
        metrics: result
            .metrics
            .iter()
            .map(|m| (m.name.clone(), JsonMetricValue::from(&m.value)))
            .collect(),
        thresholds: result
            .thresholds
            .iter()
            .map(|v| JsonThreshold {
                metric: v.metric.clone(),
                expression: v.expression.clone(),
                passed: v.passed,
                observed: v.observed,
                abort_on_fail: v.abort_on_fail,
            })
            .collect(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use stampede_core::{MetricSnapshot, RunEnd, RunResult, SchedulerReport, ThresholdVerdict};
    use stampede_metrics::{MetricKind, TrendSummary};
    use std::time::Duration;

    fn result() -> RunResult {
        RunResult {
            name: "smoke".to_string(),
            metrics: vec![
                MetricSnapshot {
                    name: "http_reqs".to_string(),
                    kind: MetricKind::Counter,
                    value: MetricValue::Counter {
                        sum: 12.0,
                        count: 12,
                    },
                },
                MetricSnapshot {
                    name: "http_req_duration".to_string(),
                    kind: MetricKind::Trend,
                    value: MetricValue::Trend(TrendSummary {
                        count: 12,
                        min: Some(1.0),
                        max: Some(9.0),
                        mean: Some(4.0),
                        p50: Some(3.0),
                        p90: Some(8.0),
                        p95: Some(8.5),
                        p99: Some(9.0),
                    }),
                },
            ],
            series: Vec::new(),
            thresholds: vec![ThresholdVerdict {
                metric: "http_req_duration".to_string(),
                expression: "p(95)<500".to_string(),
                passed: true,
                observed: Some(8.5),
                abort_on_fail: false,
            }],
            overall_pass: true,
            elapsed: Duration::from_millis(1_500),
            iterations: 6,
            aborted: None,
            scheduler: SchedulerReport {
                peak_active: 2,
                spawned: 2,
                retired: 2,
                script_failures: 0,
                panicked: 0,
                abandoned: 0,
                ended_by: RunEnd::IterationsExhausted,
            },
        }
    }

    #[test]
    fn summary_line_has_metrics_and_verdicts() {
        let line = build_summary_line(&result());
        let v: Value = match serde_json::to_value(&line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };

        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(
            v.get("ended_by").and_then(Value::as_str),
            Some("iterations_exhausted")
        );
        assert_eq!(
            v.pointer("/metrics/http_reqs/type").and_then(Value::as_str),
            Some("counter")
        );
        assert_eq!(
            v.pointer("/metrics/http_req_duration/p95")
                .and_then(Value::as_f64),
            Some(8.5)
        );
        assert_eq!(
            v.pointer("/thresholds/0/passed").and_then(Value::as_bool),
            Some(true)
        );
        assert_eq!(v.get("overall_pass").and_then(Value::as_bool), Some(true));
    }
}
