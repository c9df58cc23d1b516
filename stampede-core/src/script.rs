use std::time::Duration;

use rand::Rng;

/// Ordered, immutable workflow executed by every virtual user on each iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioScript {
    pub steps: Vec<Step>,
    /// Header templates sent with every request unless the step sets the same header.
    pub default_headers: Vec<(String, String)>,
}

impl ScenarioScript {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            default_headers: Vec::new(),
        }
    }

    pub fn requests(&self) -> impl Iterator<Item = &RequestStep> {
        self.steps.iter().filter_map(|s| match s {
            Step::Request(r) => Some(r),
            _ => None,
        })
    }

    pub fn checks(&self) -> impl Iterator<Item = &CheckStep> {
        self.steps.iter().filter_map(|s| match s {
            Step::Check(c) => Some(c),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Request(RequestStep),
    Check(CheckStep),
    Sleep(SleepSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestStep {
    /// Added to the request's samples as the `name` tag.
    pub name: Option<String>,
    pub method: http::Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
    pub capture: Vec<Capture>,
    /// Custom trend that also receives the final attempt's latency.
    pub trend: Option<String>,
}

impl RequestStep {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            name: None,
            method,
            url: url.into(),
            body: None,
            headers: Vec::new(),
            tags: Vec::new(),
            capture: Vec::new(),
            trend: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }
}

/// Stores the value at `path` in the response JSON under `key` in the iteration scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub key: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckStep {
    pub name: String,
    pub predicate: Predicate,
    /// A failing fatal check skips the rest of the iteration.
    pub fatal: bool,
    /// Think time taken before the iteration ends on a failed fatal check.
    pub fatal_pause: Option<SleepSpec>,
    pub tags: Vec<(String, String)>,
    pub on_pass: Vec<MetricEmit>,
    pub on_fail: Vec<MetricEmit>,
}

impl CheckStep {
    pub fn new(name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            name: name.into(),
            predicate,
            fatal: false,
            fatal_pause: None,
            tags: Vec::new(),
            on_pass: Vec::new(),
            on_fail: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    StatusIs(u16),
    StatusIn(Vec<u16>),
    BodyContains(String),
    JsonFieldExists(String),
    JsonFieldEquals(String, serde_json::Value),
    HeaderPresent(String),
    LatencyBelow(Duration),
}

/// One sample written to a named metric when a check passes or fails.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEmit {
    pub metric: String,
    pub value: f64,
    pub tags: Vec<(String, String)>,
}

impl MetricEmit {
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepSpec {
    Fixed(Duration),
    Range { min: Duration, max: Duration },
}

impl SleepSpec {
    /// Think time for one execution; ranges are drawn uniformly from `[min, max]`.
    pub fn draw(&self, rng: &mut impl Rng) -> Duration {
        match *self {
            SleepSpec::Fixed(d) => d,
            SleepSpec::Range { min, max } if max <= min => min,
            SleepSpec::Range { min, max } => {
                let lo = u64::try_from(min.as_nanos()).unwrap_or(u64::MAX);
                let hi = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
                Duration::from_nanos(rng.random_range(lo..=hi))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand::rngs::SmallRng;

    #[test]
    fn sleep_range_draws_stay_in_bounds() {
        let mut rng = SmallRng::seed_from_u64(1);
        let spec = SleepSpec::Range {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        };
        let draws: Vec<Duration> = (0..1_000).map(|_| spec.draw(&mut rng)).collect();
        assert!(draws.iter().all(|d| *d >= Duration::from_secs(1)));
        assert!(draws.iter().all(|d| *d <= Duration::from_secs(3)));
        // Uniform draws should land on both halves of the range.
        assert!(draws.iter().any(|d| *d < Duration::from_secs(2)));
        assert!(draws.iter().any(|d| *d > Duration::from_secs(2)));
    }

    #[test]
    fn degenerate_range_and_fixed_sleep_are_constant() {
        let mut rng = SmallRng::seed_from_u64(1);
        let d = Duration::from_millis(250);
        assert_eq!(SleepSpec::Fixed(d).draw(&mut rng), d);
        assert_eq!(SleepSpec::Range { min: d, max: d }.draw(&mut rng), d);
    }

    #[test]
    fn script_filters_steps_by_kind() {
        let script = ScenarioScript::new(vec![
            Step::Request(RequestStep::get("http://x/a")),
            Step::Check(CheckStep::new("ok", Predicate::StatusIs(200))),
            Step::Sleep(SleepSpec::Fixed(Duration::from_secs(1))),
            Step::Request(RequestStep::get("http://x/b")),
        ]);
        assert_eq!(script.requests().count(), 2);
        assert_eq!(script.checks().count(), 1);
    }
}
