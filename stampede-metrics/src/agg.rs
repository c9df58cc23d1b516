use smallvec::SmallVec;

use crate::error::Result;
use crate::key::KeyId;
use crate::metrics::{MetricKind, MetricStorage, MetricValue, rate_of};
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;
use crate::trend::TrendDigest;

#[derive(Debug, Clone, Copy)]
enum TagFilter {
    Eq(KeyId, KeyId),
    /// Matches nothing: the filter names a string no series was ever tagged with.
    Never,
}

impl TagFilter {
    fn matches(&self, tags: &TagSet) -> bool {
        match *self {
            TagFilter::Eq(k, v) => tags.get(k) == Some(v),
            TagFilter::Never => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterTotals {
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateTotals {
    pub total: u64,
    pub hits: u64,
}

impl RateTotals {
    pub fn rate(&self) -> Option<f64> {
        rate_of(self.hits, self.total)
    }
}

/// Read-only view over the series of one metric, narrowed by tag filters.
///
/// Matching series are merged: counters and rates are summed, trend digests are combined.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    registry: &'a Registry,
    metric: MetricId,
    filters: SmallVec<[TagFilter; 4]>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(registry: &'a Registry, metric: MetricId) -> Self {
        Self {
            registry,
            metric,
            filters: SmallVec::new(),
        }
    }

    /// Keeps series tagged `key=value`, without interning either string.
    #[must_use]
    pub fn where_eq_str(mut self, key: &str, value: &str) -> Self {
        let filter = match (self.registry.lookup_key(key), self.registry.lookup_key(value)) {
            (Some(k), Some(v)) => TagFilter::Eq(k, v),
            _ => TagFilter::Never,
        };
        self.filters.push(filter);
        self
    }

    fn matches(&self, tags: &TagSet) -> bool {
        self.filters.iter().all(|f| f.matches(tags))
    }

    pub fn series_count(&self) -> usize {
        let mut n = 0;
        self.registry.visit_series(self.metric, |tags, _| {
            if self.matches(tags) {
                n += 1;
            }
        });
        n
    }

    pub fn sum_counter(&self) -> CounterTotals {
        let mut out = CounterTotals::default();
        self.registry.visit_series(self.metric, |tags, storage| {
            if !self.matches(tags) {
                return;
            }
            if let MetricStorage::Counter(c) = storage {
                out.sum += c.sum();
                out.count = out.count.saturating_add(c.count());
            }
        });
        out
    }

    pub fn sum_rate(&self) -> RateTotals {
        let mut out = RateTotals::default();
        self.registry.visit_series(self.metric, |tags, storage| {
            if !self.matches(tags) {
                return;
            }
            if let MetricStorage::Rate(r) = storage {
                let (total, hits) = r.load();
                out.total = out.total.saturating_add(total);
                out.hits = out.hits.saturating_add(hits);
            }
        });
        out
    }

    pub fn merge_trend(&self) -> Result<TrendDigest> {
        let mut acc = TrendDigest::new(self.registry.precision())?;
        let mut err = None;
        self.registry.visit_series(self.metric, |tags, storage| {
            if err.is_some() || !self.matches(tags) {
                return;
            }
            let MetricStorage::Trend(t) = storage else {
                return;
            };
            if let Err(e) = acc.merge(&t.lock()) {
                err = Some(e);
            }
        });
        match err {
            Some(e) => Err(e),
            None => Ok(acc),
        }
    }

    /// Merged value of all matching series, shaped by the metric's kind.
    pub fn value(&self) -> Result<Option<MetricValue>> {
        let Some(kind) = self.registry.kind(self.metric) else {
            return Ok(None);
        };
        Ok(Some(match kind {
            MetricKind::Counter => {
                let c = self.sum_counter();
                MetricValue::Counter {
                    sum: c.sum,
                    count: c.count,
                }
            }
            MetricKind::Rate => {
                let r = self.sum_rate();
                MetricValue::Rate {
                    total: r.total,
                    hits: r.hits,
                    rate: r.rate(),
                }
            }
            MetricKind::Trend => MetricValue::Trend(self.merge_trend()?.summary()),
        }))
    }
}
