use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::MetricKind;

use crate::script::ScenarioScript;

/// Linear ramp segment: concurrency moves from the previous target to `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    /// Scheduler re-evaluation period.
    pub tick_interval: Duration,
    /// Extra attempts for requests failing with a transient transport error.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// How long finishing users may keep running after the run ends before they are aborted.
    pub graceful_stop: Duration,
    /// Significant digits kept by trend digests.
    pub trend_precision: u8,
    pub request_timeout: Duration,
    /// Period of the `abort_on_fail` threshold evaluation.
    pub threshold_interval: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            graceful_stop: Duration::from_secs(30),
            trend_precision: 3,
            request_timeout: Duration::from_secs(60),
            threshold_interval: Duration::from_secs(1),
        }
    }
}

/// User-declared metric, registered next to the built-in ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomMetric {
    pub name: String,
    pub kind: MetricKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdCondition {
    pub expression: String,
    /// Stop the run as soon as this condition fails.
    pub abort_on_fail: bool,
    /// Elapsed time before `abort_on_fail` starts being checked.
    pub delay_abort_eval: Duration,
}

impl ThresholdCondition {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        }
    }
}

/// All conditions declared for one metric key (`name` or `name{tag=value}`).
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub metric: String,
    pub conditions: Vec<ThresholdCondition>,
}

pub type EnvVars = Arc<[(Arc<str>, Arc<str>)]>;

/// Fully parsed test plan: everything a run needs besides the transport.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    /// Shared cap on completed iterations across all users.
    pub iterations: Option<u64>,
    pub script: ScenarioScript,
    pub metrics: Vec<CustomMetric>,
    pub thresholds: Vec<ThresholdSet>,
    pub vars: BTreeMap<String, String>,
    pub tunables: Tunables,
}

impl Plan {
    pub fn new(stages: Vec<Stage>, script: ScenarioScript) -> Self {
        Self {
            name: "default".to_string(),
            start_vus: 0,
            stages,
            iterations: None,
            script,
            metrics: Vec::new(),
            thresholds: Vec::new(),
            vars: BTreeMap::new(),
            tunables: Tunables::default(),
        }
    }

    /// Flat `vus` users for `duration`, starting at full concurrency.
    pub fn constant(vus: u64, duration: Duration, script: ScenarioScript) -> Self {
        let mut plan = Self::new(vec![Stage::new(duration, vus)], script);
        plan.start_vus = vus;
        plan
    }

    pub fn max_vus(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start_vus)
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }
}

pub fn env_from_pairs<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> EnvVars
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let vars: Vec<(Arc<str>, Arc<str>)> = vars
        .into_iter()
        .map(|(k, v)| (Arc::<str>::from(k.as_ref()), Arc::<str>::from(v.as_ref())))
        .collect();
    Arc::from(vars.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_plan_starts_at_full_concurrency() {
        let plan = Plan::constant(10, Duration::from_secs(5), ScenarioScript::default());
        assert_eq!(plan.start_vus, 10);
        assert_eq!(plan.max_vus(), 10);
        assert_eq!(plan.total_duration(), Duration::from_secs(5));
    }

    #[test]
    fn max_vus_covers_start_and_stage_targets() {
        let mut plan = Plan::new(
            vec![
                Stage::new(Duration::from_secs(1), 4),
                Stage::new(Duration::from_secs(1), 9),
                Stage::new(Duration::from_secs(1), 0),
            ],
            ScenarioScript::default(),
        );
        assert_eq!(plan.max_vus(), 9);
        plan.start_vus = 12;
        assert_eq!(plan.max_vus(), 12);
        assert_eq!(plan.total_duration(), Duration::from_secs(3));
    }

    #[test]
    fn env_from_pairs_keeps_order() {
        let env = env_from_pairs([("BASE_URL", "http://x"), ("A", "1")]);
        assert_eq!(env.len(), 2);
        assert_eq!(&*env[0].0, "BASE_URL");
        assert_eq!(&*env[1].1, "1");
    }
}
