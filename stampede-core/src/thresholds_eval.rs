use std::time::Duration;

use stampede_metrics::{MetricKind, Query, Registry};

use crate::error::Result;
use crate::thresholds::{ThresholdAgg, ThresholdRule};

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdVerdict {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    /// `None` when no matching samples exist; such a rule fails.
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
}

/// Evaluates `rules` against the current registry contents. Reads only; calling it again
/// without new samples gives the same verdicts.
pub fn evaluate(
    registry: &Registry,
    rules: &[ThresholdRule],
    elapsed: Duration,
) -> Result<Vec<ThresholdVerdict>> {
    rules
        .iter()
        .map(|rule| {
            let observed = observed_value(registry, rule, elapsed)?;
            Ok(ThresholdVerdict {
                metric: rule.key.clone(),
                expression: rule.expression.clone(),
                passed: observed.is_some_and(|v| rule.expr.op.compare(v, rule.expr.value)),
                observed,
                abort_on_fail: rule.abort_on_fail,
            })
        })
        .collect()
}

fn query<'a>(registry: &'a Registry, rule: &ThresholdRule) -> Query<'a> {
    rule.tags
        .iter()
        .fold(registry.query(rule.metric), |q, (k, v)| q.where_eq_str(k, v))
}

fn observed_value(
    registry: &Registry,
    rule: &ThresholdRule,
    elapsed: Duration,
) -> Result<Option<f64>> {
    let q = query(registry, rule);
    let agg = rule.expr.agg;

    Ok(match rule.kind {
        MetricKind::Trend => {
            let digest = q.merge_trend()?;
            match agg {
                ThresholdAgg::Avg => digest.mean(),
                ThresholdAgg::Min => digest.min(),
                ThresholdAgg::Max => digest.max(),
                ThresholdAgg::Med => digest.quantile(0.5),
                ThresholdAgg::P(p) => digest.percentile(p),
                ThresholdAgg::Count => (digest.count() > 0).then_some(digest.count() as f64),
                ThresholdAgg::Rate => None,
            }
        }
        MetricKind::Rate => {
            let totals = q.sum_rate();
            match agg {
                ThresholdAgg::Rate => totals.rate(),
                ThresholdAgg::Count => (totals.total > 0).then_some(totals.total as f64),
                _ => None,
            }
        }
        MetricKind::Counter => {
            let totals = q.sum_counter();
            if totals.count == 0 {
                None
            } else {
                match agg {
                    ThresholdAgg::Count => Some(totals.sum),
                    ThresholdAgg::Rate if !elapsed.is_zero() => {
                        Some(totals.sum / elapsed.as_secs_f64())
                    }
                    _ => None,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ThresholdCondition, ThresholdSet};
    use crate::thresholds::compile;
    use stampede_metrics::Sample;

    fn rules(registry: &Registry, metric: &str, exprs: &[&str]) -> Vec<ThresholdRule> {
        compile(
            &[ThresholdSet {
                metric: metric.to_string(),
                conditions: exprs.iter().map(|e| ThresholdCondition::new(*e)).collect(),
            }],
            registry,
        )
        .unwrap_or_else(|e| panic!("{e}"))
    }

    fn record(registry: &Registry, name: &str, tags: &[(&str, &str)], value: f64) {
        let (id, _) = registry
            .lookup(name)
            .unwrap_or_else(|| panic!("unregistered {name}"));
        registry
            .record(&Sample::new(
                id,
                registry.resolve_tags(tags.iter().copied()),
                value,
            ))
            .unwrap_or_else(|e| panic!("{e}"));
    }

    fn latency_registry() -> Registry {
        let registry = Registry::default();
        registry
            .register("http_req_duration", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        registry
    }

    #[test]
    fn p95_over_uniform_latencies() {
        let registry = latency_registry();
        for v in 1..=1000 {
            record(&registry, "http_req_duration", &[], f64::from(v) * 0.5);
        }

        let verdicts = evaluate(
            &registry,
            &rules(&registry, "http_req_duration", &["p(95)<500", "p(95)<400"]),
            Duration::from_secs(1),
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert!(verdicts[0].passed);
        assert!(!verdicts[1].passed);
        let observed = verdicts[0].observed.unwrap_or_else(|| panic!("no value"));
        assert!((observed - 475.0).abs() < 1.0, "{observed}");
    }

    #[test]
    fn p95_boundaries_pass_at_450_and_fail_at_600() {
        let registry = latency_registry();
        for _ in 0..100 {
            record(&registry, "http_req_duration", &[("type", "fast")], 450.0);
            record(&registry, "http_req_duration", &[("type", "slow")], 600.0);
        }

        let fast = evaluate(
            &registry,
            &rules(&registry, "http_req_duration{type:fast}", &["p(95)<500"]),
            Duration::from_secs(1),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(fast[0].passed);

        let slow = evaluate(
            &registry,
            &rules(&registry, "http_req_duration{type=slow}", &["p(95)<500"]),
            Duration::from_secs(1),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(!slow[0].passed);
    }

    #[test]
    fn no_samples_fails_the_rule() {
        let registry = latency_registry();
        record(&registry, "http_req_duration", &[("type", "read")], 10.0);

        let verdicts = evaluate(
            &registry,
            &rules(
                &registry,
                "http_req_duration{type:write}",
                &["p(95)<500", "count==0"],
            ),
            Duration::from_secs(1),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(verdicts.iter().all(|v| !v.passed && v.observed.is_none()));
    }

    #[test]
    fn rate_and_counter_aggregations() {
        let registry = Registry::default();
        registry
            .register("checks", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        registry
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        for i in 0..100 {
            record(&registry, "checks", &[], if i < 98 { 1.0 } else { 0.0 });
            record(&registry, "http_reqs", &[], 1.0);
        }

        let mut all = rules(&registry, "checks", &["rate>0.95", "rate==1.0", "count==100"]);
        all.extend(rules(&registry, "http_reqs", &["count>=100", "rate<=10"]));
        let verdicts = evaluate(&registry, &all, Duration::from_secs(10))
            .unwrap_or_else(|e| panic!("{e}"));

        let passed: Vec<bool> = verdicts.iter().map(|v| v.passed).collect();
        assert_eq!(passed, vec![true, false, true, true, true]);
        assert_eq!(verdicts[4].observed, Some(10.0));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let registry = latency_registry();
        for v in [100.0, 250.0, 900.0] {
            record(&registry, "http_req_duration", &[], v);
        }
        let rules = rules(&registry, "http_req_duration", &["avg<500", "max<800", "med<300"]);

        let first = evaluate(&registry, &rules, Duration::from_secs(1))
            .unwrap_or_else(|e| panic!("{e}"));
        let second = evaluate(&registry, &rules, Duration::from_secs(1))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|v| v.passed).collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }
}
