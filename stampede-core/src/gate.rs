use std::sync::atomic::{AtomicU64, Ordering};

/// Shared cap on the number of iterations started across all virtual users.
#[derive(Debug)]
pub struct IterationGate {
    counter: AtomicU64,
    iterations: u64,
}

impl IterationGate {
    pub fn new(iterations: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            iterations,
        }
    }

    /// Claims the next iteration slot. Returns `false` once the cap is reached.
    pub fn next(&self) -> bool {
        self.counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                (c < self.iterations).then_some(c + 1)
            })
            .is_ok()
    }

    pub fn is_exhausted(&self) -> bool {
        self.counter.load(Ordering::Relaxed) >= self.iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn hands_out_exactly_the_cap_across_threads() {
        let gate = Arc::new(IterationGate::new(1_000));
        let granted = AtomicU64::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let gate = gate.clone();
                let granted = &granted;
                scope.spawn(move || {
                    while gate.next() {
                        granted.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(granted.load(Ordering::Relaxed), 1_000);
        assert!(gate.is_exhausted());
        assert!(!gate.next());
        assert!(gate.is_exhausted());
    }
}
