use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::trend::{Precision, TrendDigest, TrendSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricKind {
    /// Running sum of observed values.
    Counter,
    /// Fraction of non-zero observations.
    Rate,
    /// Distribution of observed values (latencies).
    Trend,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter {
        sum: f64,
        count: u64,
    },
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Trend(TrendSummary),
}

impl MetricValue {
    /// Number of samples behind this value.
    pub fn samples(&self) -> u64 {
        match self {
            MetricValue::Counter { count, .. } => *count,
            MetricValue::Rate { total, .. } => *total,
            MetricValue::Trend(s) => s.count,
        }
    }
}

/// Lock-free `f64` accumulator.
#[derive(Debug, Default)]
pub struct CounterCell {
    bits: AtomicU64,
    samples: AtomicU64,
}

impl CounterCell {
    pub fn add(&self, value: f64) {
        let mut cur = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(cur) + value).to_bits();
            match self
                .bits
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct RateCell {
    pub total: AtomicU64,
    pub hits: AtomicU64,
}

impl RateCell {
    pub fn add(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// `(total, hits)`
    pub fn load(&self) -> (u64, u64) {
        // Writers bump hits before total; clamp so a reader never sees hits > total.
        let hits = self.hits.load(Ordering::Acquire);
        let total = self.total.load(Ordering::Acquire);
        (total.max(hits), hits)
    }
}

#[derive(Debug)]
pub enum MetricStorage {
    Counter(Arc<CounterCell>),
    Rate(Arc<RateCell>),
    Trend(Arc<Mutex<TrendDigest>>),
}

impl MetricStorage {
    pub fn new(kind: MetricKind, precision: Precision) -> Result<Self> {
        Ok(match kind {
            MetricKind::Counter => MetricStorage::Counter(Arc::default()),
            MetricKind::Rate => MetricStorage::Rate(Arc::default()),
            MetricKind::Trend => {
                MetricStorage::Trend(Arc::new(Mutex::new(TrendDigest::new(precision)?)))
            }
        })
    }

    pub fn handle(&self) -> MetricHandle {
        match self {
            MetricStorage::Counter(a) => MetricHandle::Counter(a.clone()),
            MetricStorage::Rate(a) => MetricHandle::Rate(a.clone()),
            MetricStorage::Trend(a) => MetricHandle::Trend(a.clone()),
        }
    }

    pub fn value(&self) -> MetricValue {
        match self {
            MetricStorage::Counter(c) => MetricValue::Counter {
                sum: c.sum(),
                count: c.count(),
            },
            MetricStorage::Rate(r) => {
                let (total, hits) = r.load();
                MetricValue::Rate {
                    total,
                    hits,
                    rate: rate_of(hits, total),
                }
            }
            MetricStorage::Trend(t) => MetricValue::Trend(t.lock().summary()),
        }
    }
}

pub(crate) fn rate_of(hits: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

/// Write handle for one series. Cloning is cheap.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<CounterCell>),
    Rate(Arc<RateCell>),
    Trend(Arc<Mutex<TrendDigest>>),
}

impl MetricHandle {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricHandle::Counter(_) => MetricKind::Counter,
            MetricHandle::Rate(_) => MetricKind::Rate,
            MetricHandle::Trend(_) => MetricKind::Trend,
        }
    }

    /// Records one observation. For rates any non-zero value is a hit.
    #[inline]
    pub fn observe(&self, value: f64) {
        match self {
            MetricHandle::Counter(c) => c.add(value),
            MetricHandle::Rate(r) => r.add(value != 0.0),
            MetricHandle::Trend(t) => t.lock().record(value),
        }
    }
}
