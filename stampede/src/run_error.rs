use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => e,
        }
    }
}

impl From<stampede_core::Error> for RunError {
    fn from(err: stampede_core::Error) -> Self {
        use stampede_core::Error;

        match err {
            Error::Metrics(
                stampede_metrics::Error::InvalidPrecision(_)
                | stampede_metrics::Error::KindMismatch { .. },
            ) => Self::InvalidInput(err.into()),
            Error::Metrics(_) => Self::RuntimeError(err.into()),
            Error::InvalidStages
            | Error::InvalidVus
            | Error::InvalidIterations
            | Error::EmptyScript
            | Error::InvalidTunable(_)
            | Error::InvalidSleepRange { .. }
            | Error::InvalidTemplate { .. }
            | Error::UnknownStepMetric { .. }
            | Error::NotATrend { .. }
            | Error::BuiltinMetricConflict(_)
            | Error::InvalidThreshold { .. }
            | Error::UnknownThresholdMetric(_)
            | Error::UnsupportedAggregation { .. } => Self::InvalidInput(err.into()),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_invalid_input() {
        let err = RunError::from(stampede_core::Error::InvalidStages);
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);

        let err = RunError::from(stampede_core::Error::UnknownThresholdMetric(
            "nope".to_string(),
        ));
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
        assert!(err.to_string().contains("nope"));

        let err = RunError::from(stampede_core::Error::Metrics(
            stampede_metrics::Error::InvalidPrecision(9),
        ));
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
    }
}
