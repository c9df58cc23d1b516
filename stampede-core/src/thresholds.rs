use std::time::Duration;

use stampede_metrics::{MetricId, MetricKind, Registry};

use crate::config::ThresholdSet;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
}

impl ThresholdOp {
    pub fn compare(self, observed: f64, bound: f64) -> bool {
        match self {
            ThresholdOp::Lt => observed < bound,
            ThresholdOp::Lte => observed <= bound,
            ThresholdOp::Gt => observed > bound,
            ThresholdOp::Gte => observed >= bound,
            ThresholdOp::Eq => observed == bound,
            ThresholdOp::NotEq => observed != bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl ThresholdAgg {
    pub fn supports(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Trend => !matches!(self, ThresholdAgg::Rate),
            MetricKind::Rate | MetricKind::Counter => {
                matches!(self, ThresholdAgg::Count | ThresholdAgg::Rate)
            }
        }
    }
}

impl std::fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdAgg::Avg => f.write_str("avg"),
            ThresholdAgg::Min => f.write_str("min"),
            ThresholdAgg::Max => f.write_str("max"),
            ThresholdAgg::Med => f.write_str("med"),
            ThresholdAgg::Count => f.write_str("count"),
            ThresholdAgg::Rate => f.write_str("rate"),
            ThresholdAgg::P(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is never read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::NotEq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let Some(inner) = other.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) else {
                return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
            };
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile out of range in threshold: {raw}"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value in threshold: {raw}"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// `name` or `name{key=value, key2:value2}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

pub fn parse_metric_selector(raw: &str) -> std::result::Result<MetricSelector, String> {
    let raw = raw.trim();
    let Some(open) = raw.find('{') else {
        if raw.is_empty() || raw.contains('}') {
            return Err(format!("invalid metric key `{raw}`"));
        }
        return Ok(MetricSelector {
            name: raw.to_string(),
            tags: Vec::new(),
        });
    };

    let name = raw[..open].trim();
    let Some(body) = raw[open + 1..].strip_suffix('}') else {
        return Err(format!("unclosed tag filter in metric key `{raw}`"));
    };
    if name.is_empty() {
        return Err(format!("missing metric name in `{raw}`"));
    }

    let mut tags = Vec::new();
    for pair in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((k, v)) = pair.split_once(['=', ':']) else {
            return Err(format!("tag filter `{pair}` in `{raw}` is not key=value"));
        };
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() {
            return Err(format!("empty tag name in `{raw}`"));
        }
        tags.push((k.to_string(), v.to_string()));
    }

    Ok(MetricSelector {
        name: name.to_string(),
        tags,
    })
}

/// A threshold condition bound to a registered metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    /// Metric key as written in the plan.
    pub key: String,
    pub metric: MetricId,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub expression: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

/// Parses every threshold and checks it against the registered metrics.
pub fn compile(sets: &[ThresholdSet], registry: &Registry) -> Result<Vec<ThresholdRule>> {
    let mut rules = Vec::new();

    for set in sets {
        let selector = parse_metric_selector(&set.metric).map_err(|error| {
            Error::InvalidThreshold {
                metric: set.metric.clone(),
                error,
            }
        })?;
        let (metric, kind) = registry
            .lookup(&selector.name)
            .ok_or_else(|| Error::UnknownThresholdMetric(selector.name.clone()))?;

        for cond in &set.conditions {
            let expr = parse_threshold_expr(&cond.expression).map_err(|error| {
                Error::InvalidThreshold {
                    metric: set.metric.clone(),
                    error,
                }
            })?;
            if !expr.agg.supports(kind) {
                return Err(Error::UnsupportedAggregation {
                    metric: set.metric.clone(),
                    expression: cond.expression.clone(),
                    agg: expr.agg.to_string(),
                    kind,
                });
            }

            rules.push(ThresholdRule {
                key: set.metric.clone(),
                metric,
                kind,
                tags: selector.tags.clone(),
                expression: cond.expression.clone(),
                expr,
                abort_on_fail: cond.abort_on_fail,
                delay_abort_eval: cond.delay_abort_eval,
            });
        }
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdCondition;

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  avg  <=  123  ").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parse_threshold_expr_reads_every_operator() {
        for (raw, op) in [
            ("rate<0.01", ThresholdOp::Lt),
            ("rate<=0.01", ThresholdOp::Lte),
            ("rate>0.01", ThresholdOp::Gt),
            ("rate>=0.01", ThresholdOp::Gte),
            ("rate==1.0", ThresholdOp::Eq),
            ("count!=0", ThresholdOp::NotEq),
        ] {
            let expr = parse_threshold_expr(raw).unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(expr.op, op, "{raw}");
        }
    }

    #[test]
    fn parse_threshold_expr_accepts_fractional_percentiles() {
        let expr = parse_threshold_expr("p(99.9) < 1500").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::P(99.9));
        assert_eq!(expr.agg.to_string(), "p(99.9)");

        let med = parse_threshold_expr("MED<200").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(med.agg, ThresholdAgg::Med);
    }

    #[test]
    fn parse_threshold_expr_rejects_bad_input() {
        for raw in ["", "p(0)<1", "p(101)<1", "avg", "avg<", "<5", "avg<abc", "mean<1"] {
            assert!(parse_threshold_expr(raw).is_err(), "{raw}");
        }
        let err = match parse_threshold_expr("p(101)<1") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("out of range"));
    }

    #[test]
    fn parse_metric_selector_accepts_both_tag_separators() {
        let sel =
            parse_metric_selector("http_req_duration{type:read, name = get plan}")
                .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(sel.name, "http_req_duration");
        assert_eq!(
            sel.tags,
            vec![
                ("type".to_string(), "read".to_string()),
                ("name".to_string(), "get plan".to_string())
            ]
        );

        let plain = parse_metric_selector("checks").unwrap_or_else(|e| panic!("{e}"));
        assert!(plain.tags.is_empty());

        for raw in ["", "{a=b}", "m{a=b", "m{novalue}", "m{=x}"] {
            assert!(parse_metric_selector(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn compile_validates_metric_and_aggregation() {
        let registry = Registry::default();
        registry
            .register("http_req_failed", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        registry
            .register("http_req_duration", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));

        let set = |metric: &str, expr: &str| ThresholdSet {
            metric: metric.to_string(),
            conditions: vec![ThresholdCondition::new(expr)],
        };

        let rules = compile(
            &[
                set("http_req_failed", "rate<0.01"),
                set("http_req_duration{type:read}", "p(95)<500"),
            ],
            &registry,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].tags, vec![("type".to_string(), "read".to_string())]);

        assert!(matches!(
            compile(&[set("nope", "rate<1")], &registry),
            Err(Error::UnknownThresholdMetric(name)) if name == "nope"
        ));
        assert!(matches!(
            compile(&[set("http_req_failed", "p(95)<1")], &registry),
            Err(Error::UnsupportedAggregation { .. })
        ));
        assert!(matches!(
            compile(&[set("http_req_duration", "rate<1")], &registry),
            Err(Error::UnsupportedAggregation { .. })
        ));
        assert!(matches!(
            compile(&[set("http_req_duration", "p95<1")], &registry),
            Err(Error::InvalidThreshold { .. })
        ));
    }
}
