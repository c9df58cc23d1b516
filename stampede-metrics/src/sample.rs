use std::time::SystemTime;

use crate::registry::MetricId;
use crate::tags::TagSet;

/// One observation, consumed exactly once by [`crate::Registry::record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: MetricId,
    pub tags: TagSet,
    pub value: f64,
    pub timestamp: SystemTime,
}

impl Sample {
    pub fn new(metric: MetricId, tags: TagSet, value: f64) -> Self {
        Self {
            metric,
            tags,
            value,
            timestamp: SystemTime::now(),
        }
    }
}
