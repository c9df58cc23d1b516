use std::time::Duration;

use crate::config::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear desired concurrency over elapsed run time.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Index of the stage covering `elapsed`, which must be before the end of the run.
    /// Zero-duration stages are skipped, so an instant jump takes effect at its own start time.
    fn stage_index(&self, elapsed: Duration) -> usize {
        // First stage whose end is strictly after `elapsed`.
        self.cumulative_ends.partition_point(|end| *end <= elapsed)
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        (
            stage_start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    /// Desired number of active users at `elapsed`; `0` once the run is over.
    pub fn desired_at(&self, elapsed: Duration) -> u64 {
        if self.is_done(elapsed) {
            return 0;
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        if stage_duration.is_zero() {
            return end_target;
        }

        // Exact integer interpolation. Targets are non-negative, so rounding half away from
        // zero is rounding half up: floor((2 * value * den + den) / (2 * den)).
        let num = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;
        let scaled = (start_target as i128)
            .saturating_mul(den)
            .saturating_add((end_target as i128 - start_target as i128).saturating_mul(num));

        let rounded = scaled.saturating_mul(2).saturating_add(den) / den.saturating_mul(2);
        rounded.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);
        let idx = if clamped >= total {
            self.stages.len() - 1
        } else {
            self.stage_index(clamped)
        };

        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.desired_at(elapsed),
        })
    }
}
