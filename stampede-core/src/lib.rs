mod builtin_metrics;
mod check;
mod config;
mod error;
mod executor;
mod gate;
mod http;
mod json_path;
mod progress;
mod run;
mod schedule;
mod scheduler;
mod script;
mod signal;
mod summary;
mod template;
mod thresholds;
mod thresholds_eval;
mod transport;
mod vu;

pub use builtin_metrics::{
    CHECKS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, ITERATION_DURATION, ITERATIONS,
    MetricSet,
};
pub use check::LastResponse;
pub use config::{
    CustomMetric, EnvVars, Plan, Stage, ThresholdCondition, ThresholdSet, Tunables,
    env_from_pairs,
};
pub use error::{Error, IterationError, Result, ScriptError};
pub use executor::{Executor, IterationOutcome};
pub use gate::IterationGate;
pub use http::HyperTransport;
pub use progress::{LiveMetrics, ProgressFn, ProgressUpdate};
pub use run::{RunOptions, run, validate};
pub use schedule::{RampSchedule, StageSnapshot};
pub use scheduler::{LiveUsers, RunEnd, Scheduler, SchedulerReport};
pub use script::{
    Capture, CheckStep, MetricEmit, Predicate, RequestStep, ScenarioScript, SleepSpec, Step,
};
pub use signal::{AbortReason, StopSignal};
pub use summary::{MetricSnapshot, RunResult};
pub use thresholds::{
    MetricSelector, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdRule,
    parse_metric_selector, parse_threshold_expr,
};
pub use thresholds_eval::ThresholdVerdict;
pub use transport::{
    Transport, TransportError, TransportErrorKind, TransportRequest, TransportResponse,
};
pub use vu::{UserControl, UserExit, VirtualUser};
