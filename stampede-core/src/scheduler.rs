use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::executor::Executor;
use crate::gate::IterationGate;
use crate::schedule::RampSchedule;
use crate::signal::StopSignal;
use crate::transport::Transport;
use crate::vu::{UserControl, UserExit, VirtualUser, run_user};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunEnd {
    /// The stage list ran to its end.
    Completed,
    /// The stop signal fired.
    Stopped,
    /// The shared iteration cap was used up.
    IterationsExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    pub peak_active: u64,
    pub spawned: u64,
    /// Users that exited cooperatively (retired or out of iterations).
    pub retired: u64,
    pub script_failures: u64,
    pub panicked: u64,
    /// Users still running when the grace period ran out.
    pub abandoned: u64,
    pub ended_by: RunEnd,
}

/// Counters the progress reporter reads while the scheduler runs.
#[derive(Debug, Default)]
pub struct LiveUsers {
    active: AtomicU64,
    target: AtomicU64,
}

impl LiveUsers {
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }
}

struct Slot {
    control: Arc<UserControl>,
    handle: JoinHandle<UserExit>,
}

/// Keeps the number of running virtual users in line with the ramp schedule.
pub struct Scheduler<T> {
    schedule: Arc<RampSchedule>,
    executor: Arc<Executor<T>>,
    gate: Option<Arc<IterationGate>>,
    stop: Arc<StopSignal>,
    live: Arc<LiveUsers>,
    tick: Duration,
    graceful_stop: Duration,
}

impl<T: Transport> Scheduler<T> {
    pub fn new(
        schedule: Arc<RampSchedule>,
        executor: Arc<Executor<T>>,
        gate: Option<Arc<IterationGate>>,
        stop: Arc<StopSignal>,
        tick: Duration,
        graceful_stop: Duration,
    ) -> Self {
        Self {
            schedule,
            executor,
            gate,
            stop,
            live: Arc::new(LiveUsers::default()),
            tick,
            graceful_stop,
        }
    }

    pub fn live(&self) -> Arc<LiveUsers> {
        self.live.clone()
    }

    /// Runs until the schedule ends, the stop signal fires or the iteration cap is used up,
    /// then drains the remaining users.
    pub async fn run(self, started: Instant) -> SchedulerReport {
        let mut report = SchedulerReport {
            peak_active: 0,
            spawned: 0,
            retired: 0,
            script_failures: 0,
            panicked: 0,
            abandoned: 0,
            ended_by: RunEnd::Completed,
        };
        let mut slots: Vec<Slot> = Vec::new();
        let mut next_id: u64 = 1;

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = started + self.schedule.total_duration();

        let ended_by = loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.stop.wait() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }

            reap(&mut slots, &mut report).await;

            if self.stop.is_stopped() {
                break RunEnd::Stopped;
            }
            let elapsed = started.elapsed();
            if self.schedule.is_done(elapsed) {
                break RunEnd::Completed;
            }
            if self.gate.as_ref().is_some_and(|g| g.is_exhausted()) {
                break RunEnd::IterationsExhausted;
            }

            let desired = self.schedule.desired_at(elapsed);
            let mut active = slots.iter().filter(|s| !s.control.is_retiring()).count() as u64;

            if desired > active {
                for _ in active..desired {
                    slots.push(self.spawn(next_id, deadline));
                    next_id += 1;
                    report.spawned += 1;
                }
                active = desired;
            } else if desired < active {
                // Most recently spawned first.
                for slot in slots
                    .iter()
                    .rev()
                    .filter(|s| !s.control.is_retiring())
                    .take((active - desired) as usize)
                {
                    slot.control.retire();
                }
                active = desired;
            }

            report.peak_active = report.peak_active.max(active);
            self.live.active.store(active, Ordering::Relaxed);
            self.live.target.store(desired, Ordering::Relaxed);
        };

        tracing::debug!(reason = %ended_by, users = slots.len(), "draining virtual users");
        for slot in &slots {
            slot.control.retire();
        }
        self.live.target.store(0, Ordering::Relaxed);

        let grace_ends = Instant::now() + self.graceful_stop;
        for mut slot in slots {
            match tokio::time::timeout_at(grace_ends, &mut slot.handle).await {
                Ok(res) => account(res, &mut report),
                Err(_) => {
                    slot.handle.abort();
                    let _ = slot.handle.await;
                    report.abandoned += 1;
                }
            }
        }
        if report.abandoned > 0 {
            tracing::warn!(
                abandoned = report.abandoned,
                grace = ?self.graceful_stop,
                "virtual users did not finish within the graceful stop period"
            );
        }

        self.live.active.store(0, Ordering::Relaxed);
        report.ended_by = ended_by;
        report
    }

    fn spawn(&self, id: u64, deadline: Instant) -> Slot {
        let control = Arc::new(UserControl::default());
        let handle = tokio::spawn(run_user(
            VirtualUser::new(id),
            self.executor.clone(),
            control.clone(),
            self.gate.clone(),
            self.stop.clone(),
            deadline,
        ));
        Slot { control, handle }
    }
}

async fn reap(slots: &mut Vec<Slot>, report: &mut SchedulerReport) {
    let mut i = 0;
    while i < slots.len() {
        if slots[i].handle.is_finished() {
            let slot = slots.remove(i);
            account(slot.handle.await, report);
        } else {
            i += 1;
        }
    }
}

fn account(res: Result<UserExit, JoinError>, report: &mut SchedulerReport) {
    match res {
        Ok(UserExit::Retired | UserExit::Exhausted) => report.retired += 1,
        Ok(UserExit::ScriptFailed(_)) => report.script_failures += 1,
        Err(err) if err.is_panic() => {
            tracing::error!(error = %err, "virtual user panicked");
            report.panicked += 1;
        }
        Err(_) => report.abandoned += 1,
    }
}
