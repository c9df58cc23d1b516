use hdrhistogram::Histogram;

use crate::error::{Error, Result};

/// Trend values are stored as integers with this many steps per unit
/// (latencies recorded in milliseconds keep microsecond resolution).
pub const TREND_SCALE: f64 = 1_000.0;

/// Number of significant decimal digits kept by trend digests.
///
/// `3` means any reported quantile is within 0.1% of a value that was actually recorded at
/// that rank. Valid range is `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precision(u8);

impl Precision {
    pub const DEFAULT: Precision = Precision(3);

    pub fn new(digits: u8) -> Result<Self> {
        if !(1..=5).contains(&digits) {
            return Err(Error::InvalidPrecision(digits));
        }
        Ok(Self(digits))
    }

    pub fn digits(self) -> u8 {
        self.0
    }

    /// Upper bound of the relative error of a reported quantile value.
    pub fn relative_error(self) -> f64 {
        10f64.powi(-i32::from(self.0))
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Bounded-memory summary of a value distribution.
///
/// Quantiles come from an auto-resizing HDR histogram; count, min, max and sum are exact.
#[derive(Debug, Clone)]
pub struct TrendDigest {
    hist: Histogram<u64>,
    min: f64,
    max: f64,
    sum: f64,
}

impl TrendDigest {
    pub fn new(precision: Precision) -> Result<Self> {
        Ok(Self {
            hist: Histogram::new(precision.digits())?,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        })
    }

    /// Records one observation. Negative values are kept exactly in min/sum but land in the
    /// zero bucket of the histogram.
    pub fn record(&mut self, value: f64) {
        // `as` saturates: negatives map to 0.
        let scaled = (value * TREND_SCALE).round() as u64;
        self.hist.saturating_record(scaled);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    pub fn merge(&mut self, other: &TrendDigest) -> Result<()> {
        if other.count() == 0 {
            return Ok(());
        }
        self.hist.add(&other.hist)?;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    pub fn min(&self) -> Option<f64> {
        (self.count() > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count() > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        let n = self.count();
        (n > 0).then(|| self.sum / n as f64)
    }

    /// Value at quantile `q` in `[0, 1]`, clamped to the exact observed range.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count() == 0 {
            return None;
        }
        let raw = self.hist.value_at_quantile(q.clamp(0.0, 1.0)) as f64 / TREND_SCALE;
        Some(raw.clamp(self.min.max(0.0), self.max.max(0.0)))
    }

    /// Value at percentile `p` in `[0, 100]`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.quantile(p / 100.0)
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count(),
            min: self.min(),
            max: self.max(),
            mean: self.mean(),
            p50: self.quantile(0.50),
            p90: self.quantile(0.90),
            p95: self.quantile(0.95),
            p99: self.quantile(0.99),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}
