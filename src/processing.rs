//! # Processing-time index module
//!
//! Implements C3: an ordered store of [`ProcessingStartRecord`]s keyed by
//! `"{namespace}/{name}/{generation}"`, used to measure reconcile latency
//! from first observation to successful (or abandoned) completion. Spec §5
//! requires one partition per GVK, each serialized by its own mutex; the
//! index owns one [`std::sync::Mutex`]-guarded [`BTreeMap`] per registered
//! GVK rather than a single global lock, so unrelated controllers never
//! contend with each other.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One observed start-time for a given (namespace, name, generation).
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessingStartRecord {
    pub namespace: String,
    pub name: String,
    pub generation: i64,
    pub start_time: DateTime<Utc>,
    pub failed: bool,
}

fn key(namespace: &str, name: &str, generation: i64) -> String {
    format!("{namespace}/{name}/{generation}")
}

/// Keys strictly less than this generation-prefix share no records with
/// `(namespace, name)`, used to bound `BTreeMap` range scans to just the
/// matching identity.
fn range_bounds(namespace: &str, name: &str) -> (String, String) {
    let start = format!("{namespace}/{name}/");
    // One past the widest possible generation-free prefix: any byte greater
    // than '/' sorts after every digit, so this upper bound is exclusive of
    // all generations of (namespace, name) and inclusive of nothing else.
    let end = format!("{namespace}/{name}0");
    (start, end)
}

/// A single GVK's partition: one mutex-guarded ordered map.
#[derive(Default)]
struct Partition {
    records: Mutex<BTreeMap<String, ProcessingStartRecord>>,
}

impl Partition {
    fn set(&self, namespace: &str, name: &str, generation: i64, start_time: DateTime<Utc>) {
        let mut records = self.records.lock().unwrap();
        let k = key(namespace, name, generation);
        match records.get_mut(&k) {
            Some(existing) if start_time < existing.start_time => existing.start_time = start_time,
            Some(_) => {}
            None => {
                records.insert(
                    k,
                    ProcessingStartRecord {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                        generation,
                        start_time,
                        failed: false,
                    },
                );
            }
        }
    }

    fn get_range(&self, namespace: &str, name: &str, observed_gen: i64, success: bool) -> Vec<DateTime<Utc>> {
        let records = self.records.lock().unwrap();
        let (lower, upper) = range_bounds(namespace, name);
        let mut out = Vec::new();
        // Descend from (ns, name, observed_gen) in decreasing key order;
        // BTreeMap::range is ascending, so collect then reverse.
        let ceiling = key(namespace, name, observed_gen);
        for (k, record) in records.range(lower..=upper.clone()) {
            if k.as_str() > ceiling.as_str() {
                continue;
            }
            out.push((k.clone(), record.clone()));
        }
        out.sort_by(|a, b| b.0.cmp(&a.0));
        let mut times = Vec::new();
        for (_, record) in out {
            if !success && record.failed {
                break;
            }
            times.push(record.start_time);
        }
        times
    }

    fn set_range_failed(&self, namespace: &str, name: &str, observed_gen: i64) {
        let mut records = self.records.lock().unwrap();
        let (lower, upper) = range_bounds(namespace, name);
        let ceiling = key(namespace, name, observed_gen);
        let mut keys: Vec<String> = records
            .range(lower..=upper)
            .filter(|(k, _)| k.as_str() <= ceiling.as_str())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_by(|a, b| b.cmp(a));
        for k in keys {
            let record = records.get_mut(&k).unwrap();
            if record.failed {
                break;
            }
            record.failed = true;
        }
    }

    fn delete_range(&self, namespace: &str, name: &str, observed_gen: i64) {
        let mut records = self.records.lock().unwrap();
        let (lower, upper) = range_bounds(namespace, name);
        let ceiling = key(namespace, name, observed_gen);
        let keys: Vec<String> = records
            .range(lower..=upper)
            .filter(|(k, _)| k.as_str() <= ceiling.as_str())
            .map(|(k, _)| k.clone())
            .collect();
        for k in keys {
            records.remove(&k);
        }
    }
}

/// C3: one [`Partition`] per registered GVK.
#[derive(Default)]
pub struct ProcessingIndex {
    partitions: Mutex<BTreeMap<String, std::sync::Arc<Partition>>>,
}

fn gvk_key(group: &str, version: &str, kind: &str) -> String {
    format!("{group}/{version}/{kind}")
}

impl ProcessingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, group: &str, version: &str, kind: &str) -> std::sync::Arc<Partition> {
        let mut partitions = self.partitions.lock().unwrap();
        partitions
            .entry(gvk_key(group, version, kind))
            .or_insert_with(|| std::sync::Arc::new(Partition::default()))
            .clone()
    }

    /// Insert if absent; if present, keep `min(existing, t)` — events for a
    /// generation may be observed more than once before reconcile runs, and
    /// the first observation time defines latency.
    pub fn set(&self, group: &str, version: &str, kind: &str, namespace: &str, name: &str, generation: i64, t: DateTime<Utc>) {
        self.partition(group, version, kind).set(namespace, name, generation, t);
    }

    /// Descends from `(namespace, name, observed_gen)` in decreasing key
    /// order. `success=true` returns every matching start-time;
    /// `success=false` stops at the first record already marked failed, to
    /// avoid double-counting failures across repeated failed reconciles of
    /// the same generation.
    pub fn get_range(
        &self,
        group: &str,
        version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        observed_gen: i64,
        success: bool,
    ) -> Vec<DateTime<Utc>> {
        self.partition(group, version, kind)
            .get_range(namespace, name, observed_gen, success)
    }

    /// Marks every record with generation <= `observed_gen` for
    /// `(namespace, name)` as failed. Invariant: earlier generations are
    /// already failed, so the walk may exit at the first already-failed
    /// record.
    pub fn set_range_failed(&self, group: &str, version: &str, kind: &str, namespace: &str, name: &str, observed_gen: i64) {
        self.partition(group, version, kind)
            .set_range_failed(namespace, name, observed_gen);
    }

    /// Removes every record with generation <= `observed_gen` for
    /// `(namespace, name)`. Called on reconcile success.
    pub fn delete_range(&self, group: &str, version: &str, kind: &str, namespace: &str, name: &str, observed_gen: i64) {
        self.partition(group, version, kind)
            .delete_range(namespace, name, observed_gen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn set_keeps_the_earlier_observation() {
        let idx = ProcessingIndex::new();
        idx.set("g", "v1", "K", "default", "x", 1, t(10));
        idx.set("g", "v1", "K", "default", "x", 1, t(5));
        let times = idx.get_range("g", "v1", "K", "default", "x", 1, true);
        assert_eq!(times, vec![t(5)]);
    }

    #[test]
    fn s5_processing_duration_accounting() {
        let idx = ProcessingIndex::new();
        idx.set("g", "v1", "K", "default", "x", 1, t(0));
        idx.set("g", "v1", "K", "default", "x", 2, t(1));

        let failed_times = idx.get_range("g", "v1", "K", "default", "x", 2, false);
        assert_eq!(failed_times.len(), 2);
        idx.set_range_failed("g", "v1", "K", "default", "x", 2);

        idx.set("g", "v1", "K", "default", "x", 3, t(2));
        let success_times = idx.get_range("g", "v1", "K", "default", "x", 3, false);
        // gen 1 and 2 are now marked failed, so the descending walk stops
        // at the first failed record it meets: generation 3 only.
        assert_eq!(success_times.len(), 1);

        idx.delete_range("g", "v1", "K", "default", "x", 3);
        assert!(idx.get_range("g", "v1", "K", "default", "x", 3, true).is_empty());
    }

    #[test]
    fn failed_prefix_invariant_holds_after_partial_marking() {
        let idx = ProcessingIndex::new();
        idx.set("g", "v1", "K", "default", "x", 1, t(0));
        idx.set("g", "v1", "K", "default", "x", 2, t(1));
        idx.set("g", "v1", "K", "default", "x", 3, t(2));
        idx.set_range_failed("g", "v1", "K", "default", "x", 2);

        // descending from gen 3: not failed yet, included; descending then
        // hits gen 2, which is failed, so the walk stops there.
        let times = idx.get_range("g", "v1", "K", "default", "x", 3, false);
        assert_eq!(times, vec![t(2)]);
    }

    #[test]
    fn partitions_by_gvk_are_independent() {
        let idx = ProcessingIndex::new();
        idx.set("g", "v1", "A", "default", "x", 1, t(0));
        idx.set("g", "v1", "B", "default", "x", 1, t(5));
        assert_eq!(idx.get_range("g", "v1", "A", "default", "x", 1, true), vec![t(0)]);
        assert_eq!(idx.get_range("g", "v1", "B", "default", "x", 1, true), vec![t(5)]);
    }
}
