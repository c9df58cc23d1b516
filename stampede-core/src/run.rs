use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::{MetricKind, Precision, Registry};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::builtin_metrics::MetricSet;
use crate::config::{EnvVars, Plan, env_from_pairs};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::gate::IterationGate;
use crate::progress::{ProgressFn, ProgressTracker};
use crate::schedule::RampSchedule;
use crate::scheduler::Scheduler;
use crate::script::{SleepSpec, Step};
use crate::signal::{AbortReason, StopSignal};
use crate::summary::{RunResult, metric_snapshots, overall_pass};
use crate::template;
use crate::thresholds::{self, ThresholdRule};
use crate::thresholds_eval;
use crate::transport::Transport;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

pub struct RunOptions {
    /// Values for `{{env.NAME}}` templates.
    pub env: EnvVars,
    pub progress: Option<ProgressFn>,
    /// Fire to end the run early (e.g. on Ctrl-C).
    pub stop: Arc<StopSignal>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            env: env_from_pairs::<&str, &str>([]),
            progress: None,
            stop: Arc::new(StopSignal::new()),
        }
    }
}

/// Everything built from a plan before any user starts.
struct Prepared {
    registry: Arc<Registry>,
    metrics: Arc<MetricSet>,
    rules: Vec<ThresholdRule>,
}

/// Checks a plan for configuration errors without running it.
pub fn validate(plan: &Plan) -> Result<()> {
    prepare(plan).map(|_| ())
}

fn prepare(plan: &Plan) -> Result<Prepared> {
    validate_shape(plan)?;

    let precision = Precision::new(plan.tunables.trend_precision)?;
    let registry = Arc::new(Registry::new(precision));
    let metrics = MetricSet::register(&registry, &plan.metrics)?;
    validate_steps(plan, &metrics)?;
    let rules = thresholds::compile(&plan.thresholds, &registry)?;

    Ok(Prepared {
        registry,
        metrics: Arc::new(metrics),
        rules,
    })
}

fn validate_shape(plan: &Plan) -> Result<()> {
    if plan.stages.is_empty() || plan.total_duration().is_zero() {
        return Err(Error::InvalidStages);
    }
    if plan.max_vus() == 0 {
        return Err(Error::InvalidVus);
    }
    if plan.iterations == Some(0) {
        return Err(Error::InvalidIterations);
    }
    if plan.script.steps.is_empty() {
        return Err(Error::EmptyScript);
    }

    let t = &plan.tunables;
    for (name, value) in [
        ("tickInterval", t.tick_interval),
        ("requestTimeout", t.request_timeout),
        ("thresholdInterval", t.threshold_interval),
    ] {
        if value.is_zero() {
            return Err(Error::InvalidTunable(name));
        }
    }
    Ok(())
}

fn validate_steps(plan: &Plan, metrics: &MetricSet) -> Result<()> {
    let declared = |step: usize, metric: &str| {
        metrics.by_name(metric).ok_or_else(|| Error::UnknownStepMetric {
            step,
            metric: metric.to_string(),
        })
    };
    // Any key resolves here; only the placeholder syntax is checked.
    let syntax = |step: usize, text: &str| {
        template::render(text, |_| Some(Cow::Borrowed("")))
            .map(|_| ())
            .map_err(|source| Error::InvalidTemplate { step, source })
    };

    for (name, value) in &plan.script.default_headers {
        syntax(0, name)?;
        syntax(0, value)?;
    }

    for (idx, step) in plan.script.steps.iter().enumerate() {
        match step {
            Step::Request(req) => {
                syntax(idx, &req.url)?;
                if let Some(body) = &req.body {
                    syntax(idx, body)?;
                }
                for (_, value) in &req.headers {
                    syntax(idx, value)?;
                }
                if let Some(trend) = &req.trend {
                    let (_, kind) = declared(idx, trend)?;
                    if kind != MetricKind::Trend {
                        return Err(Error::NotATrend {
                            step: idx,
                            metric: trend.clone(),
                        });
                    }
                }
            }
            Step::Check(chk) => {
                for emit in chk.on_pass.iter().chain(&chk.on_fail) {
                    declared(idx, &emit.metric)?;
                }
                if let Some(SleepSpec::Range { min, max }) = &chk.fatal_pause
                    && min > max
                {
                    return Err(Error::InvalidSleepRange { step: idx });
                }
            }
            Step::Sleep(SleepSpec::Range { min, max }) if min > max => {
                return Err(Error::InvalidSleepRange { step: idx });
            }
            Step::Sleep(_) => {}
        }
    }
    Ok(())
}

/// Runs `plan` to completion and evaluates its thresholds.
///
/// Configuration errors are returned before any virtual user starts.
pub async fn run<T: Transport>(plan: Plan, transport: T, opts: RunOptions) -> Result<RunResult> {
    let Prepared {
        registry,
        metrics,
        rules,
    } = prepare(&plan)?;
    let max_vus = plan.max_vus();
    let Plan {
        name,
        start_vus,
        stages,
        iterations,
        script,
        vars,
        tunables,
        ..
    } = plan;
    let RunOptions {
        env,
        progress,
        stop,
    } = opts;

    let schedule = Arc::new(RampSchedule::new(start_vus, stages));
    let executor = Arc::new(Executor::new(
        Arc::new(script),
        registry.clone(),
        metrics.clone(),
        Arc::new(transport),
        &tunables,
        Arc::new(vars),
        env,
    ));
    let gate = iterations.map(|n| Arc::new(IterationGate::new(n)));
    let scheduler = Scheduler::new(
        schedule.clone(),
        executor,
        gate,
        stop.clone(),
        tunables.tick_interval,
        tunables.graceful_stop,
    );

    tracing::info!(
        plan = %name,
        max_vus,
        duration = ?schedule.total_duration(),
        iterations = ?iterations,
        thresholds = rules.len(),
        "starting run"
    );

    let started = Instant::now();
    let tracker = progress.map(|f| {
        (
            f,
            ProgressTracker::new(
                registry.clone(),
                metrics.clone(),
                schedule.clone(),
                scheduler.live(),
            ),
        )
    });
    let watcher = spawn_watcher(
        registry.clone(),
        &rules,
        stop.clone(),
        tunables.threshold_interval,
        tracker,
        started,
    );

    let report = scheduler.run(started).await;
    let elapsed = started.elapsed();

    if let Some(h) = watcher {
        h.abort();
        let _ = h.await;
    }

    let thresholds = thresholds_eval::evaluate(&registry, &rules, elapsed)?;
    let aborted = stop.reason().cloned();
    let overall_pass = overall_pass(&thresholds, aborted.as_ref());
    let iterations = registry.query(metrics.iterations).sum_counter().sum as u64;

    tracing::info!(
        plan = %name,
        elapsed = ?elapsed,
        iterations,
        ended_by = %report.ended_by,
        overall_pass,
        "run finished"
    );

    Ok(RunResult {
        name,
        metrics: metric_snapshots(&registry)?,
        series: registry.summarize(),
        thresholds,
        overall_pass,
        elapsed,
        iterations,
        aborted,
        scheduler: report,
    })
}

/// Background task for `abort_on_fail` thresholds and progress updates.
fn spawn_watcher(
    registry: Arc<Registry>,
    rules: &[ThresholdRule],
    stop: Arc<StopSignal>,
    threshold_interval: Duration,
    mut progress: Option<(ProgressFn, ProgressTracker)>,
    started: Instant,
) -> Option<JoinHandle<()>> {
    let mut abort_rules: Vec<ThresholdRule> =
        rules.iter().filter(|r| r.abort_on_fail).cloned().collect();
    if abort_rules.is_empty() && progress.is_none() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut threshold_tick =
            tokio::time::interval_at(started + threshold_interval, threshold_interval);
        threshold_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress_tick =
            tokio::time::interval_at(started + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
        progress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = threshold_tick.tick(), if !abort_rules.is_empty() => {
                    if let Some(reason) = check_abort(&registry, &abort_rules, started.elapsed()) {
                        tracing::warn!(%reason, "aborting run");
                        stop.stop(reason);
                        abort_rules.clear();
                    }
                }
                _ = progress_tick.tick(), if progress.is_some() => {
                    if let Some((f, tracker)) = progress.as_mut() {
                        f(tracker.update(started.elapsed()));
                    }
                }
                else => break,
            }
        }
    }))
}

/// First failing `abort_on_fail` rule whose delay has passed. Rules without samples yet are
/// not a reason to abort.
fn check_abort(
    registry: &Registry,
    rules: &[ThresholdRule],
    elapsed: Duration,
) -> Option<AbortReason> {
    let due: Vec<ThresholdRule> = rules
        .iter()
        .filter(|r| elapsed >= r.delay_abort_eval)
        .cloned()
        .collect();
    if due.is_empty() {
        return None;
    }

    let verdicts = match thresholds_eval::evaluate(registry, &due, elapsed) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(error = %err, "threshold evaluation failed");
            return None;
        }
    };
    verdicts
        .into_iter()
        .find(|v| !v.passed && v.observed.is_some())
        .map(|v| AbortReason::Threshold {
            metric: v.metric,
            expression: v.expression,
            observed: v.observed,
        })
}
