use crate::metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown metric id {0}")]
    UnknownMetric(u32),

    #[error("metric `{name}` is already registered as {registered}, cannot register as {requested}")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },

    #[error("trend precision must be between 1 and 5 significant digits (got {0})")]
    InvalidPrecision(u8),

    #[error("metric `{metric}` received a non-finite value")]
    NonFiniteValue { metric: String },

    #[error("failed to create trend histogram: {0}")]
    HistogramCreate(#[from] hdrhistogram::CreationError),

    #[error("failed to merge trend histograms: {0}")]
    HistogramMerge(#[from] hdrhistogram::AdditionError),
}
