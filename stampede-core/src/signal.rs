use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Why a run ended before its schedule did.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// An `abort_on_fail` threshold failed.
    Threshold {
        metric: String,
        expression: String,
        observed: Option<f64>,
    },
    /// Stopped from outside the engine (e.g. Ctrl-C).
    External(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Threshold {
                metric, expression, ..
            } => write!(f, "threshold `{metric}: {expression}` failed"),
            AbortReason::External(why) => write!(f, "stopped: {why}"),
        }
    }
}

/// One-shot run stop request, observable both by polling and by awaiting.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    reason: OnceLock<AbortReason>,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Only the first reason is kept.
    pub fn stop(&self, reason: AbortReason) {
        let _ = self.reason.set(reason);
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<&AbortReason> {
        self.reason.get()
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}
