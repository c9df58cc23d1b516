use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use stampede_core::{
    Capture, CheckStep, CustomMetric, MetricEmit, Plan, Predicate, RequestStep, ScenarioScript,
    SleepSpec, Stage, Step, ThresholdCondition, ThresholdSet, Tunables,
};
use stampede_metrics::MetricKind;

/// Cap on wall time for plans that only bound the iteration count.
const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PlanYaml {
    #[serde(default)]
    pub name: Option<String>,

    /// Plain template values (`{{NAME}}`).
    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub vars: BTreeMap<String, String>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: Option<u64>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    // constant shape
    #[serde(default)]
    pub vus: Option<u64>,
    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(default)]
    pub iterations: Option<u64>,

    /// Wall-time bound when only `iterations` is given.
    #[serde(default)]
    pub max_duration: Option<YamlDuration>,

    /// Shorthand for a default `User-Agent` header.
    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub options: OptionsYaml,

    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub default_headers: BTreeMap<String, String>,

    #[serde(default)]
    pub metrics: BTreeMap<String, MetricKindYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdYaml>,

    pub steps: Vec<StepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct OptionsYaml {
    pub tick_interval: Option<YamlDuration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<YamlDuration>,
    pub graceful_stop: Option<YamlDuration>,
    pub request_timeout: Option<YamlDuration>,
    pub trend_precision: Option<u8>,
    pub threshold_interval: Option<YamlDuration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MetricKindYaml {
    Counter,
    Rate,
    Trend,
}

impl From<MetricKindYaml> for MetricKind {
    fn from(value: MetricKindYaml) -> Self {
        match value {
            MetricKindYaml::Counter => MetricKind::Counter,
            MetricKindYaml::Rate => MetricKind::Rate,
            MetricKindYaml::Trend => MetricKind::Trend,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdYaml {
    One(ThresholdEntryYaml),
    Many(Vec<ThresholdEntryYaml>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdEntryYaml {
    Expr(String),
    Full(ThresholdFullYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThresholdFullYaml {
    pub threshold: String,
    #[serde(default)]
    pub abort_on_fail: bool,
    #[serde(default)]
    pub delay_abort_eval: Option<YamlDuration>,
}

/// One of `request`, `check` or `sleep`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StepYaml {
    #[serde(default)]
    pub request: Option<RequestYaml>,
    #[serde(default)]
    pub check: Option<CheckYaml>,
    #[serde(default)]
    pub sleep: Option<SleepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    pub url: String,
    /// A string is sent as is; any other value is sent as JSON.
    #[serde(default)]
    pub body: Option<serde_yaml::Value>,
    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub tags: BTreeMap<String, String>,
    /// scratch key -> JSON path
    #[serde(default)]
    pub capture: BTreeMap<String, String>,
    #[serde(default)]
    pub trend: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CheckYaml {
    pub name: String,

    #[serde(default)]
    pub status: Option<OneOrMany<u16>>,
    #[serde(default)]
    pub body_contains: Option<String>,
    #[serde(default)]
    pub json_field: Option<String>,
    /// Expected value of `jsonField`; without it the field only has to exist.
    #[serde(default)]
    pub equals: Option<serde_json::Value>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub latency_below: Option<YamlDuration>,

    #[serde(default)]
    pub fatal: bool,
    /// Think time before the iteration ends when a fatal check fails.
    #[serde(default)]
    pub fatal_pause: Option<SleepYaml>,
    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub on_pass: Vec<EmitYaml>,
    #[serde(default)]
    pub on_fail: Vec<EmitYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct EmitYaml {
    pub metric: String,
    #[serde(default = "default_emit_value")]
    pub value: f64,
    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub tags: BTreeMap<String, String>,
}

fn default_emit_value() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum SleepYaml {
    Fixed(YamlDuration),
    Range { min: YamlDuration, max: YamlDuration },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|_| E::custom("duration must be a non-negative, finite number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Maps scalar values (strings, numbers, booleans) to strings; nulls are dropped.
fn deserialize_scalars<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;

    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => return Err(D::Error::custom(format!("`{k}` must be a scalar value"))),
        };
        out.insert(k, s);
    }

    Ok(out)
}

/// CLI flags that take precedence over the plan file.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Overrides {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
}

pub(crate) async fn load_plan(path: &Path, overrides: Overrides) -> anyhow::Result<Plan> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read test plan: {}", path.display()))?;

    let doc: PlanYaml = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("failed to parse YAML: {}", path.display()))?;

    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("default");

    doc.into_plan(default_name, overrides)
        .with_context(|| format!("invalid test plan: {}", path.display()))
}

impl PlanYaml {
    pub(crate) fn into_plan(self, default_name: &str, overrides: Overrides) -> anyhow::Result<Plan> {
        let PlanYaml {
            name,
            vars,
            start_vus,
            stages,
            vus,
            duration,
            iterations,
            max_duration,
            user_agent,
            options,
            default_headers,
            metrics,
            thresholds,
            steps,
        } = self;

        if !stages.is_empty() && (vus.is_some() || duration.is_some()) {
            anyhow::bail!("use either `stages` or `vus`/`duration`, not both");
        }

        let stages = stages
            .into_iter()
            .map(|s| Stage::new(s.duration.into_inner(), s.target))
            .collect::<Vec<_>>();
        let iterations = overrides.iterations.or(iterations);
        let max_duration = max_duration.map_or(DEFAULT_MAX_DURATION, YamlDuration::into_inner);

        let mut plan = Plan::new(Vec::new(), build_script(steps, default_headers, user_agent)?);
        let shape = Shape {
            start_vus,
            stages,
            vus,
            duration: duration.map(YamlDuration::into_inner),
        }
        .with_overrides(overrides);
        shape.apply(&mut plan, iterations.is_some(), max_duration);

        plan.name = name.unwrap_or_else(|| default_name.to_string());
        plan.iterations = iterations;
        plan.vars = vars;
        plan.tunables = build_tunables(options);
        plan.metrics = metrics
            .into_iter()
            .map(|(name, kind)| CustomMetric {
                name,
                kind: kind.into(),
            })
            .collect();
        plan.thresholds = parse_thresholds_map(thresholds)?;

        Ok(plan)
    }
}

/// Load shape before it is turned into stages.
struct Shape {
    start_vus: Option<u64>,
    stages: Vec<Stage>,
    vus: Option<u64>,
    duration: Option<Duration>,
}

impl Shape {
    /// `--vus`/`--duration` replace staged plans with a constant shape of the same size and length.
    fn with_overrides(self, overrides: Overrides) -> Self {
        if overrides.vus.is_none() && overrides.duration.is_none() {
            return self;
        }

        let staged_vus = self
            .stages
            .iter()
            .map(|s| s.target)
            .max()
            .map(|m| m.max(self.start_vus.unwrap_or(0)));
        let staged_duration = (!self.stages.is_empty()).then(|| {
            self.stages
                .iter()
                .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
        });

        Self {
            start_vus: None,
            stages: Vec::new(),
            vus: overrides.vus.or(self.vus).or(staged_vus),
            duration: overrides.duration.or(self.duration).or(staged_duration),
        }
    }

    fn apply(self, plan: &mut Plan, has_iterations: bool, max_duration: Duration) {
        if !self.stages.is_empty() {
            plan.stages = self.stages;
            plan.start_vus = self.start_vus.unwrap_or(0);
            return;
        }

        let duration = match self.duration {
            Some(d) => d,
            None if has_iterations => max_duration,
            // Left empty; rejected by plan validation.
            None => return,
        };
        let vus = self.vus.unwrap_or(1);
        plan.stages = vec![Stage::new(duration, vus)];
        plan.start_vus = vus;
    }
}

fn build_tunables(options: OptionsYaml) -> Tunables {
    let OptionsYaml {
        tick_interval,
        max_retries,
        retry_delay,
        graceful_stop,
        request_timeout,
        trend_precision,
        threshold_interval,
    } = options;

    let defaults = Tunables::default();
    let pick = |v: Option<YamlDuration>, d: Duration| v.map_or(d, YamlDuration::into_inner);

    Tunables {
        tick_interval: pick(tick_interval, defaults.tick_interval),
        max_retries: max_retries.unwrap_or(defaults.max_retries),
        retry_delay: pick(retry_delay, defaults.retry_delay),
        graceful_stop: pick(graceful_stop, defaults.graceful_stop),
        trend_precision: trend_precision.unwrap_or(defaults.trend_precision),
        request_timeout: pick(request_timeout, defaults.request_timeout),
        threshold_interval: pick(threshold_interval, defaults.threshold_interval),
    }
}

fn build_script(
    steps: Vec<StepYaml>,
    default_headers: BTreeMap<String, String>,
    user_agent: Option<String>,
) -> anyhow::Result<ScenarioScript> {
    let steps = steps
        .into_iter()
        .enumerate()
        .map(|(idx, step)| build_step(step).with_context(|| format!("step {idx}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut script = ScenarioScript::new(steps);
    script.default_headers = default_headers.into_iter().collect();
    if let Some(ua) = user_agent
        && !script
            .default_headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
    {
        script.default_headers.push(("User-Agent".to_string(), ua));
    }
    Ok(script)
}

fn build_step(step: StepYaml) -> anyhow::Result<Step> {
    match step {
        StepYaml {
            request: Some(req),
            check: None,
            sleep: None,
        } => build_request(req).map(Step::Request),
        StepYaml {
            request: None,
            check: Some(chk),
            sleep: None,
        } => build_check(chk).map(Step::Check),
        StepYaml {
            request: None,
            check: None,
            sleep: Some(sleep),
        } => Ok(Step::Sleep(sleep_spec(sleep))),
        _ => anyhow::bail!("a step must have exactly one of `request`, `check` or `sleep`"),
    }
}

fn sleep_spec(sleep: SleepYaml) -> SleepSpec {
    match sleep {
        SleepYaml::Fixed(d) => SleepSpec::Fixed(d.into_inner()),
        SleepYaml::Range { min, max } => SleepSpec::Range {
            min: min.into_inner(),
            max: max.into_inner(),
        },
    }
}

fn build_request(req: RequestYaml) -> anyhow::Result<RequestStep> {
    let RequestYaml {
        name,
        method,
        url,
        body,
        headers,
        tags,
        capture,
        trend,
    } = req;

    let method = match method {
        Some(m) => http::Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method `{m}`"))?,
        None => http::Method::GET,
    };

    let mut step = RequestStep::new(method, url);
    step.name = name;
    step.headers = headers.into_iter().collect();
    step.tags = tags.into_iter().collect();
    step.trend = trend;
    step.capture = capture
        .into_iter()
        .map(|(key, path)| Capture { key, path })
        .collect();

    step.body = match body {
        None | Some(serde_yaml::Value::Null) => None,
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(value) => {
            let json = serde_json::to_string(&value).context("request body is not valid JSON")?;
            if !step
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            {
                step.headers
                    .push(("Content-Type".to_string(), "application/json".to_string()));
            }
            Some(json)
        }
    };

    Ok(step)
}

fn build_check(chk: CheckYaml) -> anyhow::Result<CheckStep> {
    let CheckYaml {
        name,
        status,
        body_contains,
        json_field,
        equals,
        header,
        latency_below,
        fatal,
        fatal_pause,
        tags,
        on_pass,
        on_fail,
    } = chk;

    if equals.is_some() && json_field.is_none() {
        anyhow::bail!("check `{name}`: `equals` needs `jsonField`");
    }
    if fatal_pause.is_some() && !fatal {
        anyhow::bail!("check `{name}`: `fatalPause` needs `fatal: true`");
    }

    let mut predicates = Vec::new();
    if let Some(status) = status {
        predicates.push(match status {
            OneOrMany::One(code) => Predicate::StatusIs(code),
            OneOrMany::Many(codes) => Predicate::StatusIn(codes),
        });
    }
    if let Some(needle) = body_contains {
        predicates.push(Predicate::BodyContains(needle));
    }
    if let Some(path) = json_field {
        predicates.push(match equals {
            Some(expected) => Predicate::JsonFieldEquals(path, expected),
            None => Predicate::JsonFieldExists(path),
        });
    }
    if let Some(header) = header {
        predicates.push(Predicate::HeaderPresent(header));
    }
    if let Some(bound) = latency_below {
        predicates.push(Predicate::LatencyBelow(bound.into_inner()));
    }

    let predicate = match predicates.len() {
        0 => anyhow::bail!("check `{name}` has no condition"),
        1 => predicates.remove(0),
        _ => anyhow::bail!("check `{name}` must have exactly one condition"),
    };

    let emits = |list: Vec<EmitYaml>| {
        list.into_iter()
            .map(|e| MetricEmit {
                metric: e.metric,
                value: e.value,
                tags: e.tags.into_iter().collect(),
            })
            .collect::<Vec<_>>()
    };

    let mut step = CheckStep::new(name, predicate);
    step.fatal = fatal;
    step.fatal_pause = fatal_pause.map(sleep_spec);
    step.tags = tags.into_iter().collect();
    step.on_pass = emits(on_pass);
    step.on_fail = emits(on_fail);
    Ok(step)
}

fn parse_thresholds_map(raw: BTreeMap<String, ThresholdYaml>) -> anyhow::Result<Vec<ThresholdSet>> {
    let mut out = Vec::new();

    for (metric, v) in raw {
        let entries = match v {
            ThresholdYaml::One(e) => vec![e],
            ThresholdYaml::Many(v) => v,
        };

        if entries.is_empty() {
            anyhow::bail!("invalid thresholds for `{metric}`: empty list");
        }

        let conditions = entries
            .into_iter()
            .map(|e| match e {
                ThresholdEntryYaml::Expr(expression) => ThresholdCondition::new(expression),
                ThresholdEntryYaml::Full(full) => ThresholdCondition {
                    expression: full.threshold,
                    abort_on_fail: full.abort_on_fail,
                    delay_abort_eval: full
                        .delay_abort_eval
                        .map_or(Duration::ZERO, YamlDuration::into_inner),
                },
            })
            .collect();

        out.push(ThresholdSet { metric, conditions });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(yaml: &str) -> PlanYaml {
        serde_yaml::from_str(yaml).unwrap_or_else(|e| panic!("{e}"))
    }

    fn plan(yaml: &str) -> Plan {
        parse(yaml)
            .into_plan("fixture", Overrides::default())
            .unwrap_or_else(|e| panic!("{e:#}"))
    }

    fn fixture_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("plans")
            .join(name)
    }

    const STAGED: &str = r#"
name: ramping-load
vars: { BASE_URL: "http://localhost:4567/api", PAGE: 2 }
startVUs: 1
stages:
  - { duration: 30s, target: 20 }
  - { duration: 1m, target: 20 }
  - { duration: 30s, target: 0 }
options: { maxRetries: 1, retryDelay: 250ms, gracefulStop: 5s }
defaultHeaders: { Content-Type: application/json }
userAgent: stampede-test
metrics: { create_plan_latency: trend, errors: rate }
thresholds:
  "http_req_duration{type:read}": "p(95)<500"
  http_req_failed: ["rate<0.01", "count<10"]
  checks:
    - { threshold: "rate>0.95", abortOnFail: true, delayAbortEval: 10s }
steps:
  - request:
      method: post
      url: "{{BASE_URL}}/travel-plans"
      body: { title: "Trip {{__VU}}", budget: 1500 }
      tags: { type: write }
      capture: { plan_id: id }
      trend: create_plan_latency
  - check: { name: plan created, status: 201, fatal: true, fatalPause: 300ms, onFail: [{ metric: errors }], onPass: [{ metric: errors, value: 0 }] }
  - request: { url: "{{BASE_URL}}/travel-plans/{{plan_id}}", tags: { type: read } }
  - check: { name: has version, jsonField: version, equals: 1 }
  - sleep: { min: 1s, max: 3s }
  - sleep: 500ms
"#;

    #[test]
    fn loads_staged_plan() {
        let plan = plan(STAGED);

        assert_eq!(plan.name, "ramping-load");
        assert_eq!(plan.start_vus, 1);
        assert_eq!(plan.stages.len(), 3);
        assert_eq!(plan.stages[1], Stage::new(Duration::from_secs(60), 20));
        assert_eq!(plan.iterations, None);
        assert_eq!(plan.vars.get("PAGE").map(String::as_str), Some("2"));
        assert_eq!(plan.tunables.max_retries, 1);
        assert_eq!(plan.tunables.retry_delay, Duration::from_millis(250));
        assert_eq!(plan.tunables.graceful_stop, Duration::from_secs(5));
        assert_eq!(plan.tunables.tick_interval, Tunables::default().tick_interval);
        assert!(
            plan.script
                .default_headers
                .contains(&("User-Agent".to_string(), "stampede-test".to_string()))
        );
        assert_eq!(plan.metrics.len(), 2);
        assert_eq!(plan.thresholds.len(), 3);

        let checks = plan
            .thresholds
            .iter()
            .find(|t| t.metric == "checks")
            .unwrap_or_else(|| panic!("missing checks threshold"));
        assert!(checks.conditions[0].abort_on_fail);
        assert_eq!(checks.conditions[0].delay_abort_eval, Duration::from_secs(10));

        let Step::Request(create) = &plan.script.steps[0] else {
            panic!("expected a request step");
        };
        assert_eq!(create.method, http::Method::POST);
        assert_eq!(
            create.capture,
            vec![Capture {
                key: "plan_id".to_string(),
                path: "id".to_string()
            }]
        );
        let body: serde_json::Value = serde_json::from_str(create.body.as_deref().unwrap_or(""))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(body["budget"], serde_json::json!(1500));

        let Step::Check(created) = &plan.script.steps[1] else {
            panic!("expected a check step");
        };
        assert_eq!(created.predicate, Predicate::StatusIs(201));
        assert!(created.fatal);
        assert_eq!(
            created.fatal_pause,
            Some(SleepSpec::Fixed(Duration::from_millis(300)))
        );
        assert_eq!(created.on_fail[0].value, 1.0);
        assert_eq!(created.on_pass[0].value, 0.0);

        assert_eq!(
            plan.script.steps[3],
            Step::Check(CheckStep::new(
                "has version",
                Predicate::JsonFieldEquals("version".to_string(), serde_json::json!(1))
            ))
        );
        assert_eq!(
            plan.script.steps[4],
            Step::Sleep(SleepSpec::Range {
                min: Duration::from_secs(1),
                max: Duration::from_secs(3)
            })
        );
        assert_eq!(
            plan.script.steps[5],
            Step::Sleep(SleepSpec::Fixed(Duration::from_millis(500)))
        );
    }

    #[test]
    fn constant_shape_starts_at_full_concurrency() {
        let plan = plan(
            r#"
vus: 10
duration: 5
steps:
  - request: { url: "http://localhost/api/health" }
"#,
        );
        assert_eq!(plan.name, "fixture");
        assert_eq!(plan.start_vus, 10);
        assert_eq!(plan.stages, vec![Stage::new(Duration::from_secs(5), 10)]);
    }

    #[test]
    fn iterations_only_plan_gets_a_time_bound() {
        let plan = plan(
            r#"
iterations: 3
steps:
  - request: { url: "http://localhost/api/health" }
"#,
        );
        assert_eq!(plan.iterations, Some(3));
        assert_eq!(plan.stages, vec![Stage::new(DEFAULT_MAX_DURATION, 1)]);
    }

    #[test]
    fn cli_overrides_replace_stages_with_constant_shape() {
        let overrides = Overrides {
            vus: Some(4),
            duration: None,
            iterations: Some(100),
        };
        let plan = parse(STAGED)
            .into_plan("fixture", overrides)
            .unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(plan.start_vus, 4);
        assert_eq!(plan.stages, vec![Stage::new(Duration::from_secs(120), 4)]);
        assert_eq!(plan.iterations, Some(100));

        let overrides = Overrides {
            duration: Some(Duration::from_secs(3)),
            ..Overrides::default()
        };
        let plan = parse(STAGED)
            .into_plan("fixture", overrides)
            .unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(plan.stages, vec![Stage::new(Duration::from_secs(3), 20)]);
    }

    #[test]
    fn status_list_and_scalar_tags() {
        let plan = plan(
            r#"
vus: 1
duration: 1s
steps:
  - request: { method: PUT, url: "http://x/api", body: '{"v":{{v}}}', tags: { attempt: 1, cached: true } }
  - check: { name: updated, status: [200, 409] }
"#,
        );
        let Step::Request(req) = &plan.script.steps[0] else {
            panic!("expected a request step");
        };
        assert_eq!(req.body.as_deref(), Some(r#"{"v":{{v}}}"#));
        assert!(req.headers.is_empty());
        assert_eq!(
            req.tags,
            vec![
                ("attempt".to_string(), "1".to_string()),
                ("cached".to_string(), "true".to_string())
            ]
        );
        let Step::Check(chk) = &plan.script.steps[1] else {
            panic!("expected a check step");
        };
        assert_eq!(chk.predicate, Predicate::StatusIn(vec![200, 409]));
    }

    #[test]
    fn rejects_ambiguous_steps_and_checks() {
        let err = |yaml: &str| match parse(yaml).into_plan("fixture", Overrides::default()) {
            Ok(_) => panic!("expected an error"),
            Err(e) => format!("{e:#}"),
        };

        let msg = err(
            r#"
vus: 1
duration: 1s
steps:
  - request: { url: "http://x" }
    sleep: 1s
"#,
        );
        assert!(msg.contains("exactly one of"), "{msg}");

        let msg = err(
            r#"
vus: 1
duration: 1s
steps:
  - check: { name: both, status: 200, bodyContains: ok }
"#,
        );
        assert!(msg.contains("exactly one condition"), "{msg}");

        let msg = err(
            r#"
vus: 1
duration: 1s
steps:
  - check: { name: soft, status: 200, fatalPause: 300ms }
"#,
        );
        assert!(msg.contains("`fatalPause` needs `fatal: true`"), "{msg}");

        let msg = err(
            r#"
vus: 1
stages: [{ duration: 1s, target: 1 }]
steps:
  - request: { url: "http://x" }
"#,
        );
        assert!(msg.contains("not both"), "{msg}");

        let msg = err(
            r#"
vus: 1
duration: 1s
thresholds: { checks: [] }
steps:
  - request: { url: "http://x" }
"#,
        );
        assert!(msg.contains("empty list"), "{msg}");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res = serde_yaml::from_str::<PlanYaml>(
            r#"
vus: 1
duraton: 1s
steps: []
"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn scalars_reject_nested_values() {
        let res = serde_yaml::from_str::<PlanYaml>(
            r#"
vars: { A: [1, 2] }
steps: []
"#,
        );
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn loads_fixture_file() {
        let plan = load_plan(&fixture_path("smoke.yaml"), Overrides::default())
            .await
            .unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(plan.name, "smoke");
        assert!(!plan.script.steps.is_empty());
        stampede_core::validate(&plan).unwrap_or_else(|e| panic!("{e}"));
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let err = match load_plan(&fixture_path("nope.yaml"), Overrides::default()).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => format!("{e:#}"),
        };
        assert!(err.contains("nope.yaml"), "{err}");
    }
}
