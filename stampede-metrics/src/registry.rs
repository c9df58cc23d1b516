use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::agg::Query;
use crate::error::{Error, Result};
use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricStorage};
use crate::sample::Sample;
use crate::tags::TagSet;
use crate::trend::Precision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(u32);

#[derive(Debug)]
pub struct MetricDef {
    pub name: KeyId,
    pub kind: MetricKind,
}

type SeriesMap = DashMap<TagSet, MetricStorage, RandomState>;

/// Metric accumulator for one run.
///
/// Every `(metric, tag set)` pair owns its own storage: counters and rates are atomics, each
/// trend has its own mutex. Both levels are sharded `DashMap`s, so writers to unrelated series
/// never contend and readers never hold a lock for longer than one series.
#[derive(Debug)]
pub struct Registry {
    interner: Interner,
    precision: Precision,
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, SeriesMap, RandomState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Precision::DEFAULT)
    }
}

impl Registry {
    pub fn new(precision: Precision) -> Self {
        Self {
            interner: Interner::new(),
            precision,
            defs: RwLock::new(Vec::new()),
            storage: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Registers `name` with `kind`. Registering an existing name with the same kind returns
    /// the existing id.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let name_id = self.interner.intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name == name_id) {
            if def.kind != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    registered: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.storage
            .insert(id, DashMap::with_hasher(RandomState::new()));
        Ok(id)
    }

    /// Finds a registered metric by name.
    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let name_id = self.interner.get(name)?;
        self.defs
            .read()
            .iter()
            .enumerate()
            .find(|(_, d)| d.name == name_id)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn kind(&self, metric: MetricId) -> Option<MetricKind> {
        self.defs.read().get(metric.0 as usize).map(|d| d.kind)
    }

    pub fn name(&self, metric: MetricId) -> Option<Arc<str>> {
        let name = self.defs.read().get(metric.0 as usize)?.name;
        self.interner.resolve(name)
    }

    pub fn metric_ids(&self) -> Vec<MetricId> {
        (0..self.defs.read().len() as u32).map(MetricId).collect()
    }

    /// Interns `key`.
    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.intern(key)
    }

    /// Looks up `key` without interning it.
    pub fn lookup_key(&self, key: &str) -> Option<KeyId> {
        self.interner.get(key)
    }

    pub fn resolve_tags<K, V>(&self, tags: impl IntoIterator<Item = (K, V)>) -> TagSet
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        TagSet::from_pairs(
            tags.into_iter()
                .map(|(k, v)| (self.resolve_key(k.as_ref()), self.resolve_key(v.as_ref()))),
        )
    }

    pub fn tag_strings(&self, tags: &TagSet) -> Vec<(String, String)> {
        let s = |id| {
            self.interner
                .resolve(id)
                .map(|s| s.to_string())
                .unwrap_or_default()
        };
        tags.iter().map(|(k, v)| (s(k), s(v))).collect()
    }

    /// Returns the write handle of one series, creating the series on first use.
    pub fn get_handle(&self, metric: MetricId, tags: TagSet) -> Result<MetricHandle> {
        let series_map = self
            .storage
            .get(&metric)
            .ok_or(Error::UnknownMetric(metric.0))?;

        if let Some(storage) = series_map.get(&tags) {
            return Ok(storage.handle());
        }

        let kind = self.kind(metric).ok_or(Error::UnknownMetric(metric.0))?;
        let entry = series_map
            .entry(tags)
            .or_try_insert_with(|| MetricStorage::new(kind, self.precision))?;
        Ok(entry.handle())
    }

    pub fn record(&self, sample: &Sample) -> Result<()> {
        if !sample.value.is_finite() {
            return Err(Error::NonFiniteValue {
                metric: self
                    .name(sample.metric)
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
            });
        }
        self.get_handle(sample.metric, sample.tags.clone())?
            .observe(sample.value);
        Ok(())
    }

    pub(crate) fn visit_series(&self, metric: MetricId, mut f: impl FnMut(&TagSet, &MetricStorage)) {
        let Some(series_map) = self.storage.get(&metric) else {
            return;
        };
        for series in series_map.iter() {
            f(series.key(), series.value());
        }
    }

    pub fn query(&self, metric: MetricId) -> Query<'_> {
        Query::new(self, metric)
    }

    /// Point-in-time snapshot of every series, sorted by metric name.
    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let mut out = Vec::new();

        for metric in self.metric_ids() {
            let (Some(name), Some(kind)) = (self.name(metric), self.kind(metric)) else {
                continue;
            };
            self.visit_series(metric, |tags, storage| {
                out.push(MetricSeriesSummary {
                    name: name.to_string(),
                    kind,
                    tags: self.tag_strings(tags),
                    values: storage.value(),
                });
            });
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;

    #[test]
    fn register_is_idempotent_per_kind() {
        let reg = Registry::default();
        let a = reg
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        let b = reg
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);
        assert!(matches!(
            reg.register("http_reqs", MetricKind::Trend),
            Err(Error::KindMismatch { .. })
        ));
        assert_eq!(reg.lookup("http_reqs"), Some((a, MetricKind::Counter)));
        assert_eq!(reg.lookup("nope"), None);
    }

    #[test]
    fn record_routes_samples_to_series() {
        let reg = Registry::default();
        let m = reg
            .register("checks", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        let ok = reg.resolve_tags([("check", "status 200")]);
        let other = reg.resolve_tags([("check", "has id")]);

        for v in [1.0, 1.0, 0.0] {
            reg.record(&Sample::new(m, ok.clone(), v))
                .unwrap_or_else(|e| panic!("{e}"));
        }
        reg.record(&Sample::new(m, other, 0.0))
            .unwrap_or_else(|e| panic!("{e}"));

        let series = reg.summarize();
        assert_eq!(series.len(), 2);
        let status = series
            .iter()
            .find(|s| s.tags == vec![("check".to_string(), "status 200".to_string())])
            .unwrap_or_else(|| panic!("missing series"));
        assert_eq!(
            status.values,
            MetricValue::Rate {
                total: 3,
                hits: 2,
                rate: Some(2.0 / 3.0)
            }
        );
    }

    #[test]
    fn record_rejects_non_finite_values_and_unknown_metrics() {
        let reg = Registry::default();
        let m = reg
            .register("iteration_duration", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(
            reg.record(&Sample::new(m, TagSet::default(), f64::NAN)),
            Err(Error::NonFiniteValue { .. })
        ));
        assert!(matches!(
            reg.get_handle(MetricId(42), TagSet::default()),
            Err(Error::UnknownMetric(42))
        ));
    }

    #[test]
    fn concurrent_writers_to_one_trend_keep_every_sample() {
        let reg = Registry::default();
        let m = reg
            .register("http_req_duration", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        std::thread::scope(|scope| {
            for t in 0..8 {
                let reg = &reg;
                scope.spawn(move || {
                    let tags = reg.resolve_tags([("vu", (t % 2).to_string())]);
                    for i in 0..500 {
                        reg.record(&Sample::new(m, tags.clone(), f64::from(i)))
                            .unwrap_or_else(|e| panic!("{e}"));
                    }
                });
            }
        });
        let total: u64 = reg.summarize().iter().map(|s| s.values.samples()).sum();
        assert_eq!(total, 4_000);
    }
}
