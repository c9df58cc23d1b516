pub mod agg;
pub mod error;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod sample;
pub mod tags;
pub mod trend;

pub use agg::{CounterTotals, Query, RateTotals};
pub use error::{Error, Result};
pub use key::KeyId;
pub use metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricValue};
pub use registry::{MetricId, Registry};
pub use sample::Sample;
pub use tags::TagSet;
pub use trend::{Precision, TrendDigest, TrendSummary};
