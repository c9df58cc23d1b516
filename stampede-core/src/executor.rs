use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng as _;
use stampede_metrics::{MetricId, Registry, Sample, TagSet};
use tokio::time::Instant;

use crate::builtin_metrics::MetricSet;
use crate::check::{self, LastResponse};
use crate::config::{EnvVars, Tunables};
use crate::error::{IterationError, ScriptError};
use crate::json_path;
use crate::script::{CheckStep, MetricEmit, RequestStep, ScenarioScript, SleepSpec, Step};
use crate::template;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::vu::VirtualUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    pub steps_completed: usize,
    /// Index of the fatal check that ended the iteration early.
    pub fatal_check: Option<usize>,
    pub duration: Duration,
}

/// Samples produced by one iteration; flushed into the registry when the iteration ends.
#[derive(Debug, Default)]
struct SampleBuffer {
    samples: Vec<Sample>,
}

impl SampleBuffer {
    fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    fn flush(self, registry: &Registry) {
        for sample in &self.samples {
            if let Err(err) = registry.record(sample) {
                tracing::warn!(error = %err, "dropping sample");
            }
        }
    }
}

enum Flow {
    Continue,
    Fatal,
}

/// Runs iterations of the scenario script for any number of virtual users.
#[derive(Debug)]
pub struct Executor<T> {
    script: Arc<ScenarioScript>,
    registry: Arc<Registry>,
    metrics: Arc<MetricSet>,
    transport: Arc<T>,
    max_retries: u32,
    retry_delay: Duration,
    request_timeout: Duration,
    vars: Arc<BTreeMap<String, String>>,
    env: EnvVars,
}

impl<T: Transport> Executor<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        script: Arc<ScenarioScript>,
        registry: Arc<Registry>,
        metrics: Arc<MetricSet>,
        transport: Arc<T>,
        tunables: &Tunables,
        vars: Arc<BTreeMap<String, String>>,
        env: EnvVars,
    ) -> Self {
        Self {
            script,
            registry,
            metrics,
            transport,
            max_retries: tunables.max_retries,
            retry_delay: tunables.retry_delay,
            request_timeout: tunables.request_timeout,
            vars,
            env,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs one iteration. On a script error the samples gathered so far are still recorded,
    /// but the iteration itself is not counted.
    pub async fn run_iteration(
        &self,
        user: &mut VirtualUser,
    ) -> Result<IterationOutcome, IterationError> {
        let started = Instant::now();
        let iteration = user.begin_iteration();
        let mut buf = SampleBuffer::default();
        let mut steps_completed = 0;
        let mut fatal_check = None;

        for (idx, step) in self.script.steps.iter().enumerate() {
            let flow = match step {
                Step::Request(req) => self
                    .request(req, user, &mut buf)
                    .await
                    .map(|()| Flow::Continue),
                Step::Check(chk) => self.check(chk, user, &mut buf),
                Step::Sleep(spec) => {
                    self.sleep(spec, user).await;
                    Ok(Flow::Continue)
                }
            };

            match flow {
                Ok(Flow::Continue) => steps_completed += 1,
                Ok(Flow::Fatal) => {
                    steps_completed += 1;
                    fatal_check = Some(idx);
                    if let Step::Check(CheckStep {
                        fatal_pause: Some(pause),
                        ..
                    }) = step
                    {
                        self.sleep(pause, user).await;
                    }
                    break;
                }
                Err(source) => {
                    buf.flush(&self.registry);
                    return Err(IterationError {
                        vu: user.id,
                        iteration,
                        step: idx,
                        source,
                    });
                }
            }
        }

        let duration = started.elapsed();
        buf.push(Sample::new(
            self.metrics.iterations,
            TagSet::default(),
            1.0,
        ));
        buf.push(Sample::new(
            self.metrics.iteration_duration,
            TagSet::default(),
            millis(duration),
        ));
        buf.flush(&self.registry);

        Ok(IterationOutcome {
            steps_completed,
            fatal_check,
            duration,
        })
    }

    async fn request(
        &self,
        step: &RequestStep,
        user: &mut VirtualUser,
        buf: &mut SampleBuffer,
    ) -> Result<(), ScriptError> {
        let url = self.render(&step.url, user)?.into_owned();
        let body = match &step.body {
            Some(b) => Bytes::from(self.render(b, user)?.into_owned()),
            None => Bytes::new(),
        };

        let mut headers = Vec::with_capacity(self.script.default_headers.len() + step.headers.len());
        for (name, value) in &self.script.default_headers {
            if !step.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                headers.push((name.clone(), self.render(value, user)?.into_owned()));
            }
        }
        for (name, value) in &step.headers {
            headers.push((name.clone(), self.render(value, user)?.into_owned()));
        }

        let mut tags: Vec<(&str, &str)> = step
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tags.push(("method", step.method.as_str()));
        if let Some(name) = &step.name {
            tags.push(("name", name.as_str()));
        }

        let mut attempt: u32 = 0;
        let result = loop {
            attempt += 1;
            let req = TransportRequest {
                method: step.method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: body.clone(),
                timeout: self.request_timeout,
            };
            let result = self.transport.issue_request(req).await;
            self.record_attempt(&tags, attempt, &result, buf);

            match result {
                Err(err) if err.kind.is_transient() && attempt <= self.max_retries => {
                    tracing::debug!(
                        vu = user.id,
                        url = %url,
                        attempt,
                        error = %err,
                        "retrying request"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                other => break other,
            }
        };

        let (failed, latency) = match &result {
            Ok(res) => (res.status >= 400, res.latency),
            Err(err) => (true, err.latency),
        };
        buf.push(Sample::new(
            self.metrics.http_req_failed,
            self.registry.resolve_tags(tags.iter().copied()),
            if failed { 1.0 } else { 0.0 },
        ));

        if let Some(trend) = &step.trend {
            let (metric, _) = self
                .metrics
                .by_name(trend)
                .ok_or_else(|| ScriptError::UnknownMetric(trend.clone()))?;
            buf.push(Sample::new(
                metric,
                self.registry.resolve_tags(tags.iter().copied()),
                millis(latency),
            ));
        }

        if let Ok(res) = &result
            && !step.capture.is_empty()
        {
            capture(step, res, user);
        }

        user.last = Some(match result {
            Ok(res) => LastResponse::Response(res),
            Err(err) => LastResponse::Failed(err),
        });
        Ok(())
    }

    fn record_attempt(
        &self,
        tags: &[(&str, &str)],
        attempt: u32,
        result: &Result<TransportResponse, TransportError>,
        buf: &mut SampleBuffer,
    ) {
        let (status, latency) = match result {
            Ok(res) => (res.status, res.latency),
            Err(err) => (0, err.latency),
        };
        let status = status.to_string();
        let attempt = attempt.to_string();
        let tags = self.registry.resolve_tags(
            tags.iter()
                .copied()
                .chain([("status", status.as_str()), ("attempt", attempt.as_str())]),
        );

        buf.push(Sample::new(
            self.metrics.http_req_duration,
            tags.clone(),
            millis(latency),
        ));
        buf.push(Sample::new(self.metrics.http_reqs, tags, 1.0));
    }

    fn check(
        &self,
        step: &CheckStep,
        user: &VirtualUser,
        buf: &mut SampleBuffer,
    ) -> Result<Flow, ScriptError> {
        let last = user
            .last
            .as_ref()
            .ok_or_else(|| ScriptError::NoResponse(step.name.clone()))?;
        let passed = check::evaluate(&step.predicate, last);

        let tags = self.registry.resolve_tags(
            step.tags
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .chain([("check", step.name.as_str())]),
        );
        buf.push(Sample::new(
            self.metrics.checks,
            tags,
            if passed { 1.0 } else { 0.0 },
        ));

        let emits = if passed { &step.on_pass } else { &step.on_fail };
        for emit in emits {
            let metric = self.emit_target(emit)?;
            let tags = self.registry.resolve_tags(
                step.tags
                    .iter()
                    .chain(&emit.tags)
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );
            buf.push(Sample::new(metric, tags, emit.value));
        }

        if !passed && step.fatal {
            tracing::debug!(vu = user.id, check = %step.name, "fatal check failed");
            return Ok(Flow::Fatal);
        }
        Ok(Flow::Continue)
    }

    fn emit_target(&self, emit: &MetricEmit) -> Result<MetricId, ScriptError> {
        self.metrics
            .by_name(&emit.metric)
            .map(|(id, _)| id)
            .ok_or_else(|| ScriptError::UnknownMetric(emit.metric.clone()))
    }

    async fn sleep(&self, spec: &SleepSpec, user: &mut VirtualUser) {
        let d = spec.draw(&mut user.rng);
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }

    fn render<'a>(
        &self,
        template: &'a str,
        user: &VirtualUser,
    ) -> Result<Cow<'a, str>, ScriptError> {
        template::render(template, |key| self.lookup(key, user))
    }

    /// Template key resolution: iteration scratch, built-ins, plan vars, then `env.NAME`.
    fn lookup<'v>(&'v self, key: &str, user: &'v VirtualUser) -> Option<Cow<'v, str>> {
        if let Some(v) = user.scratch.get(key) {
            return Some(Cow::Borrowed(v.as_str()));
        }
        match key {
            "__VU" => return Some(Cow::Owned(user.id.to_string())),
            "__ITER" => return Some(Cow::Owned(user.iteration().to_string())),
            "__RAND" => return Some(Cow::Owned(rand::rng().random::<u32>().to_string())),
            _ => {}
        }
        if let Some(v) = self.vars.get(key) {
            return Some(Cow::Borrowed(v.as_str()));
        }
        let name = key.strip_prefix("env.")?;
        self.env
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| Cow::Borrowed(&**v))
    }
}

fn capture(step: &RequestStep, res: &TransportResponse, user: &mut VirtualUser) {
    let json: serde_json::Value = match serde_json::from_slice(&res.body) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(vu = user.id, url = %step.url, error = %err, "response is not JSON, nothing captured");
            return;
        }
    };
    for c in &step.capture {
        match json_path::select(&json, &c.path) {
            Some(v) => {
                user.scratch.insert(c.key.clone(), json_path::to_scratch(v));
            }
            None => {
                tracing::debug!(vu = user.id, key = %c.key, path = %c.path, "capture path not found");
            }
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}
