use std::collections::BTreeMap;
use std::fmt::Write as _;

use stampede_core::{CHECKS, MetricSnapshot, RunResult};
use stampede_metrics::MetricValue;

use super::format::*;

pub(crate) fn render(result: &RunResult) -> String {
    let mut out = String::new();

    writeln!(&mut out, "summary: {}", result.name).ok();
    let s = &result.scheduler;
    writeln!(
        &mut out,
        "  elapsed: {} iterations: {} ended_by: {}",
        format_duration(result.elapsed),
        result.iterations,
        s.ended_by
    )
    .ok();
    writeln!(
        &mut out,
        "  vus: peak {} (spawned {}, retired {}, script failures {}, abandoned {})",
        s.peak_active, s.spawned, s.retired, s.script_failures, s.abandoned
    )
    .ok();
    if let Some(reason) = &result.aborted {
        writeln!(&mut out, "  aborted: {reason}").ok();
    }
    out.push('\n');

    render_checks(result, &mut out);
    render_metrics(result, &mut out);
    render_thresholds(result, &mut out);

    out
}

fn render_checks(result: &RunResult, out: &mut String) {
    // check name -> (passed, total)
    let mut checks: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for series in result.series.iter().filter(|s| s.name == CHECKS) {
        let Some((_, name)) = series.tags.iter().find(|(k, _)| k == "check") else {
            continue;
        };
        if let MetricValue::Rate { total, hits, .. } = series.values {
            let entry = checks.entry(name.as_str()).or_default();
            entry.0 += hits;
            entry.1 += total;
        }
    }

    if checks.is_empty() {
        return;
    }

    out.push_str("checks\n");
    for (name, (passed, total)) in checks {
        let mark = if passed == total { "✓" } else { "✗" };
        writeln!(out, "  {mark} {name}: {passed}/{total}").ok();
    }
    out.push('\n');
}

fn render_metrics(result: &RunResult, out: &mut String) {
    if result.metrics.is_empty() {
        out.push_str("metrics: no samples\n\n");
        return;
    }

    let width = result
        .metrics
        .iter()
        .map(|m| m.name.len())
        .max()
        .unwrap_or(0);

    out.push_str("metrics\n");
    for m in &result.metrics {
        writeln!(
            out,
            "  {:.<width$}: {}",
            format!("{} ", m.name),
            render_value(m, result),
            width = width + 2
        )
        .ok();
    }
    out.push('\n');
}

fn render_value(m: &MetricSnapshot, result: &RunResult) -> String {
    match &m.value {
        MetricValue::Counter { sum, .. } => {
            let secs = result.elapsed.as_secs_f64().max(1e-9);
            format!("{sum} ({}/s)", format_rate(sum / secs))
        }
        MetricValue::Rate { total, hits, rate } => {
            format!("{} ({hits}/{total})", format_percent(*rate))
        }
        MetricValue::Trend(t) => format!(
            "avg={} min={} med={} max={} p(90)={} p(95)={} (n={})",
            format_ms_opt(t.mean),
            format_ms_opt(t.min),
            format_ms_opt(t.p50),
            format_ms_opt(t.max),
            format_ms_opt(t.p90),
            format_ms_opt(t.p95),
            t.count
        ),
    }
}

fn render_thresholds(result: &RunResult, out: &mut String) {
    if result.thresholds.is_empty() {
        out.push_str("thresholds: none\n");
    } else {
        out.push_str("thresholds\n");
        for v in &result.thresholds {
            let mark = if v.passed { "✓" } else { "✗" };
            let observed = v
                .observed
                .map_or_else(|| "no samples".to_string(), |o| format!("observed {o:.4}"));
            writeln!(out, "  {mark} {}: {} ({observed})", v.metric, v.expression).ok();
        }
    }

    let verdict = if result.overall_pass { "PASS" } else { "FAIL" };
    writeln!(out, "\nresult: {verdict}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::{RunEnd, SchedulerReport, ThresholdVerdict};
    use stampede_metrics::{MetricKind, MetricSeriesSummary};
    use std::time::Duration;

    fn check_series(name: &str, hits: u64, total: u64) -> MetricSeriesSummary {
        MetricSeriesSummary {
            name: CHECKS.to_string(),
            kind: MetricKind::Rate,
            tags: vec![("check".to_string(), name.to_string())],
            values: MetricValue::Rate {
                total,
                hits,
                rate: Some(hits as f64 / total as f64),
            },
        }
    }

    fn result() -> RunResult {
        RunResult {
            name: "smoke".to_string(),
            metrics: vec![MetricSnapshot {
                name: "http_reqs".to_string(),
                kind: MetricKind::Counter,
                value: MetricValue::Counter {
                    sum: 20.0,
                    count: 20,
                },
            }],
            series: vec![
                check_series("plan created", 10, 10),
                check_series("plan deleted", 8, 10),
            ],
            thresholds: vec![ThresholdVerdict {
                metric: "http_req_failed".to_string(),
                expression: "rate<0.01".to_string(),
                passed: false,
                observed: Some(0.2),
                abort_on_fail: false,
            }],
            overall_pass: false,
            elapsed: Duration::from_secs(2),
            iterations: 10,
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
    fn renders_checks_metrics_and_verdict() {
        let text = render(&result());

        assert!(text.contains("summary: smoke"), "{text}");
        assert!(text.contains("✓ plan created: 10/10"), "{text}");
        assert!(text.contains("✗ plan deleted: 8/10"), "{text}");
        assert!(text.contains("20 (10/s)"), "{text}");
        assert!(
            text.contains("✗ http_req_failed: rate<0.01 (observed 0.2000)"),
            "{text}"
        );
        assert!(text.ends_with("result: FAIL\n"), "{text}");
    }
}
