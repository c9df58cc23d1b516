#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// An `abortOnFail` threshold stopped the run early.
    AbortedByThreshold = 13,

    /// Invalid CLI/plan input (bad flags, unreadable or malformed YAML, invalid stages or thresholds, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, task failures, broken metric invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_result(result: &stampede_core::RunResult) -> Self {
        if result.aborted_by_threshold() {
            Self::AbortedByThreshold
        } else if result.overall_pass {
            Self::Success
        } else {
            Self::ThresholdsFailed
        }
    }
}
