use std::collections::HashMap;

use ahash::RandomState;
use stampede_metrics::{MetricId, MetricKind, Registry};

use crate::config::CustomMetric;
use crate::error::{Error, Result};

pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";

/// Ids of every metric a run writes to: the built-in ones plus the plan's custom metrics.
#[derive(Debug, Clone)]
pub struct MetricSet {
    pub http_req_duration: MetricId,
    pub http_reqs: MetricId,
    pub http_req_failed: MetricId,
    pub checks: MetricId,
    pub iterations: MetricId,
    pub iteration_duration: MetricId,
    by_name: HashMap<String, (MetricId, MetricKind), RandomState>,
}

impl MetricSet {
    pub fn register(registry: &Registry, custom: &[CustomMetric]) -> Result<Self> {
        let mut by_name: HashMap<String, (MetricId, MetricKind), RandomState> =
            HashMap::with_hasher(RandomState::new());
        let mut builtin = |name: &str, kind: MetricKind| -> Result<MetricId> {
            let id = registry.register(name, kind)?;
            by_name.insert(name.to_string(), (id, kind));
            Ok(id)
        };

        let http_req_duration = builtin(HTTP_REQ_DURATION, MetricKind::Trend)?;
        let http_reqs = builtin(HTTP_REQS, MetricKind::Counter)?;
        let http_req_failed = builtin(HTTP_REQ_FAILED, MetricKind::Rate)?;
        let checks = builtin(CHECKS, MetricKind::Rate)?;
        let iterations = builtin(ITERATIONS, MetricKind::Counter)?;
        let iteration_duration = builtin(ITERATION_DURATION, MetricKind::Trend)?;

        for m in custom {
            if let Some((_, kind)) = by_name.get(&m.name)
                && *kind != m.kind
            {
                return Err(Error::BuiltinMetricConflict(m.name.clone()));
            }
            let id = registry.register(&m.name, m.kind)?;
            by_name.insert(m.name.clone(), (id, m.kind));
        }

        Ok(Self {
            http_req_duration,
            http_reqs,
            http_req_failed,
            checks,
            iterations,
            iteration_duration,
            by_name,
        })
    }

    pub fn by_name(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        self.by_name.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_builtins_and_custom_metrics() {
        let registry = Registry::default();
        let set = MetricSet::register(
            &registry,
            &[
                CustomMetric {
                    name: "create_plan_latency".to_string(),
                    kind: MetricKind::Trend,
                },
                CustomMetric {
                    name: "checks".to_string(),
                    kind: MetricKind::Rate,
                },
            ],
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            registry.lookup(HTTP_REQ_FAILED),
            Some((set.http_req_failed, MetricKind::Rate))
        );
        assert_eq!(
            set.by_name("create_plan_latency").map(|(_, k)| k),
            Some(MetricKind::Trend)
        );
        assert_eq!(set.by_name("nope"), None);
    }

    #[test]
    fn custom_metric_cannot_change_a_builtin_kind() {
        let registry = Registry::default();
        let err = MetricSet::register(
            &registry,
            &[CustomMetric {
                name: "iterations".to_string(),
                kind: MetricKind::Trend,
            }],
        );
        assert!(matches!(err, Err(Error::BuiltinMetricConflict(name)) if name == "iterations"));
    }
}
