use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::metrics::{CounterHandle, MetricHandle, MetricKind, RateHandle, TrendHandle};
use crate::snapshot::{MetricSnapshot, MetricValues, Snapshot, TrendSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(u32);

impl MetricId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct MetricDef {
    name: Arc<str>,
    handle: MetricHandle,
}

/// Named metrics shared by every worker of a run.
///
/// Writers never lock the registry itself: name lookups go through a concurrent map and
/// the returned handles point at atomic cells (counters, rates) or a per-metric sample
/// buffer (trends).
#[derive(Debug, Default)]
pub struct Registry {
    defs: RwLock<Vec<MetricDef>>,
    index: DashMap<Arc<str>, MetricId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as `kind`. Registering the same name and kind again returns the
    /// existing id.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        if name.trim().is_empty() {
            return Err(Error::InvalidName);
        }

        if let Some(id) = self.lookup(name) {
            return self.check_existing(name, id, kind);
        }

        let mut defs = self.defs.write();

        // Another writer may have won the race while we waited for the lock.
        if let Some(id) = self.lookup(name) {
            drop(defs);
            return self.check_existing(name, id, kind);
        }

        let id = MetricId(defs.len() as u32);
        let name: Arc<str> = Arc::from(name);
        defs.push(MetricDef {
            name: name.clone(),
            handle: MetricHandle::new(kind),
        });
        self.index.insert(name, id);
        Ok(id)
    }

    fn lookup(&self, name: &str) -> Option<MetricId> {
        self.index.get(name).map(|e| *e.value())
    }

    fn check_existing(&self, name: &str, id: MetricId, requested: MetricKind) -> Result<MetricId> {
        let existing = self.defs.read()[id.index()].handle.kind();
        if existing != requested {
            return Err(Error::DuplicateMetric {
                name: name.to_string(),
                existing,
                requested,
            });
        }
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.defs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        let id = self.lookup(name)?;
        Some(self.defs.read()[id.index()].handle.kind())
    }

    pub fn handle(&self, name: &str) -> Result<MetricHandle> {
        let id = self
            .lookup(name)
            .ok_or_else(|| Error::UnknownMetric(name.to_string()))?;
        Ok(self.defs.read()[id.index()].handle.clone())
    }

    pub fn counter(&self, name: &str) -> Result<CounterHandle> {
        match self.handle(name)? {
            MetricHandle::Counter(c) => Ok(c),
            other => Err(mismatch(name, MetricKind::Counter, other.kind())),
        }
    }

    pub fn rate(&self, name: &str) -> Result<RateHandle> {
        match self.handle(name)? {
            MetricHandle::Rate(r) => Ok(r),
            other => Err(mismatch(name, MetricKind::Rate, other.kind())),
        }
    }

    pub fn trend(&self, name: &str) -> Result<TrendHandle> {
        match self.handle(name)? {
            MetricHandle::Trend(t) => Ok(t),
            other => Err(mismatch(name, MetricKind::Trend, other.kind())),
        }
    }

    pub fn counter_add(&self, name: &str, delta: u64) -> Result<()> {
        self.counter(name)?.add(delta);
        Ok(())
    }

    pub fn rate_add(&self, name: &str, hit: bool) -> Result<()> {
        self.rate(name)?.add(hit);
        Ok(())
    }

    pub fn trend_add(&self, name: &str, value: f64) -> Result<()> {
        self.trend(name)?.add(value)
    }

    /// Copies the current state of every metric. Callers take the final snapshot after all
    /// writers are joined; a snapshot taken mid-run is still well-formed but may miss
    /// in-flight adds.
    pub fn snapshot(&self) -> Snapshot {
        let defs = self.defs.read();
        let metrics = defs
            .iter()
            .map(|def| {
                let values = match &def.handle {
                    MetricHandle::Counter(c) => MetricValues::Counter { total: c.get() },
                    MetricHandle::Rate(r) => {
                        let (hits, total) = r.get();
                        MetricValues::Rate { hits, total }
                    }
                    MetricHandle::Trend(t) => {
                        MetricValues::Trend(TrendSnapshot::from_samples(t.samples()))
                    }
                };
                MetricSnapshot {
                    name: def.name.to_string(),
                    kind: def.handle.kind(),
                    values,
                }
            })
            .collect();

        Snapshot { metrics }
    }
}

fn mismatch(name: &str, expected: MetricKind, actual: MetricKind) -> Error {
    Error::KindMismatch {
        name: name.to_string(),
        expected,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_for_same_kind() {
        let r = Registry::new();
        let a = r
            .register("auth_requests", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        let b = r
            .register("auth_requests", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn register_rejects_kind_conflicts_and_empty_names() {
        let r = Registry::new();
        r.register("m", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));

        let err = r.register("m", MetricKind::Trend).err();
        assert_eq!(
            err,
            Some(Error::DuplicateMetric {
                name: "m".to_string(),
                existing: MetricKind::Rate,
                requested: MetricKind::Trend,
            })
        );
        assert_eq!(r.register("  ", MetricKind::Counter).err(), Some(Error::InvalidName));
    }

    #[test]
    fn adds_check_name_and_kind() {
        let r = Registry::new();
        r.register("c", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            r.counter_add("missing", 1),
            Err(Error::UnknownMetric("missing".to_string()))
        );
        assert_eq!(
            r.rate_add("c", true),
            Err(Error::KindMismatch {
                name: "c".to_string(),
                expected: MetricKind::Rate,
                actual: MetricKind::Counter,
            })
        );
        assert!(r.counter_add("c", 4).is_ok());
        assert_eq!(r.snapshot().counter("c"), Some(4));
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let r = Registry::new();
        for (name, kind) in [
            ("zeta", MetricKind::Trend),
            ("alpha", MetricKind::Counter),
            ("mid", MetricKind::Rate),
        ] {
            r.register(name, kind).unwrap_or_else(|e| panic!("{e}"));
        }

        let names: Vec<_> = r
            .snapshot()
            .metrics()
            .iter()
            .map(|m| m.name.clone())
            .collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn snapshot_summarizes_each_kind() {
        let r = Registry::new();
        r.register("hits", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        r.register("ok", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        r.register("latency", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));

        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            r.trend_add("latency", v).unwrap_or_else(|e| panic!("{e}"));
        }
        for i in 0..100 {
            r.rate_add("ok", i < 95).unwrap_or_else(|e| panic!("{e}"));
        }
        r.counter_add("hits", 7).unwrap_or_else(|e| panic!("{e}"));

        let s = r.snapshot();
        assert_eq!(s.counter("hits"), Some(7));
        assert_eq!(s.rate("ok"), Some((95, 100)));

        let t = s
            .trend("latency")
            .unwrap_or_else(|| panic!("missing latency trend"));
        assert_eq!(t.count(), 5);
        assert_eq!(t.percentile(0.95), Some(50.0));
        assert_eq!(t.mean(), Some(30.0));
    }
}
