pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and run-level failures. All of them surface before any virtual user starts,
/// except `Metrics` errors raised while summarizing, which indicate a broken run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Metrics(#[from] stampede_metrics::Error),

    #[error("`stages` must be a non-empty list of {{ duration, target }} with a non-zero total duration")]
    InvalidStages,

    #[error("at least one stage target (or the start VUs) must be a positive integer")]
    InvalidVus,

    #[error("`iterations` must be a positive integer")]
    InvalidIterations,

    #[error("the scenario script has no steps")]
    EmptyScript,

    #[error("`{0}` must be a positive duration")]
    InvalidTunable(&'static str),

    #[error("step {step}: sleep range minimum is greater than its maximum")]
    InvalidSleepRange { step: usize },

    #[error("step {step}: {source}")]
    InvalidTemplate { step: usize, source: ScriptError },

    #[error("step {step}: metric `{metric}` is not declared")]
    UnknownStepMetric { step: usize, metric: String },

    #[error("step {step}: metric `{metric}` must be a trend to record request latency")]
    NotATrend { step: usize, metric: String },

    #[error("metric `{0}` collides with a built-in metric of a different kind")]
    BuiltinMetricConflict(String),

    #[error("invalid threshold for metric `{metric}`: {error}")]
    InvalidThreshold { metric: String, error: String },

    #[error("threshold references unknown metric `{0}`")]
    UnknownThresholdMetric(String),

    #[error("threshold `{expression}` on `{metric}` uses `{agg}`, which is not defined for {kind} metrics")]
    UnsupportedAggregation {
        metric: String,
        expression: String,
        agg: String,
        kind: stampede_metrics::MetricKind,
    },
}

/// Error that ends one iteration (and the virtual user running it).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("no value for template key `{0}`")]
    MissingValue(String),

    #[error("malformed template `{template}`: {reason}")]
    MalformedTemplate {
        template: String,
        reason: &'static str,
    },

    #[error("check `{0}` ran before any request")]
    NoResponse(String),

    #[error("metric `{0}` is not registered")]
    UnknownMetric(String),
}

/// A [`ScriptError`] with the position it happened at.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("vu {vu}, iteration {iteration}, step {step}: {source}")]
pub struct IterationError {
    pub vu: u64,
    pub iteration: u64,
    pub step: usize,
    #[source]
    pub source: ScriptError,
}
