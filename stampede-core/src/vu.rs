use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng as _;
use rand::rngs::SmallRng;
use tokio::time::Instant;

use crate::check::LastResponse;
use crate::error::IterationError;
use crate::executor::Executor;
use crate::gate::IterationGate;
use crate::signal::StopSignal;
use crate::transport::Transport;

/// State owned by one virtual user task. Scratch and the last response reset every iteration.
#[derive(Debug)]
pub struct VirtualUser {
    pub id: u64,
    next_iteration: u64,
    iteration: u64,
    pub(crate) scratch: HashMap<String, String>,
    pub(crate) last: Option<LastResponse>,
    pub(crate) rng: SmallRng,
}

impl VirtualUser {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            next_iteration: 0,
            iteration: 0,
            scratch: HashMap::new(),
            last: None,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Deterministic think times, for tests.
    pub fn with_seed(id: u64, seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            ..Self::new(id)
        }
    }

    /// Zero-based index of the iteration in progress (or the last one run).
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Iterations started so far.
    pub fn iterations_started(&self) -> u64 {
        self.next_iteration
    }

    pub fn scratch(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).map(String::as_str)
    }

    pub(crate) fn begin_iteration(&mut self) -> u64 {
        self.iteration = self.next_iteration;
        self.next_iteration += 1;
        self.scratch.clear();
        self.last = None;
        self.iteration
    }
}

/// Retirement flag set by the scheduler; the user exits before its next iteration.
#[derive(Debug, Default)]
pub struct UserControl {
    retiring: AtomicBool,
}

impl UserControl {
    pub fn retire(&self) {
        self.retiring.store(true, Ordering::Release);
    }

    pub fn is_retiring(&self) -> bool {
        self.retiring.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub enum UserExit {
    Retired,
    /// The shared iteration cap was reached.
    Exhausted,
    ScriptFailed(IterationError),
}

pub(crate) async fn run_user<T: Transport>(
    mut user: VirtualUser,
    executor: Arc<Executor<T>>,
    control: Arc<UserControl>,
    gate: Option<Arc<IterationGate>>,
    stop: Arc<StopSignal>,
    deadline: Instant,
) -> UserExit {
    loop {
        // No new iteration starts once the run window has closed.
        if control.is_retiring() || stop.is_stopped() || Instant::now() >= deadline {
            return UserExit::Retired;
        }
        if let Some(gate) = &gate
            && !gate.next()
        {
            return UserExit::Exhausted;
        }

        if let Err(err) = executor.run_iteration(&mut user).await {
            tracing::warn!(
                vu = err.vu,
                iteration = err.iteration,
                step = err.step,
                error = %err.source,
                "script error, stopping virtual user"
            );
            return UserExit::ScriptFailed(err);
        }

        // An iteration whose transport never suspends must not starve the scheduler.
        tokio::task::yield_now().await;
    }
}
