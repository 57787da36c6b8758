//! Bounded, thread-safe time series store.
//!
//! One mutex covers every series, so a group append and a snapshot exclude
//! each other: a snapshot sees a whole group or none of it. Callers never see
//! the lock.
//!
//! Writers go through a [`StoreWriter`] tied to the session epoch that created
//! it. Once a new session begins, writers from older sessions are rejected, so
//! a producer that was torn down without being joined cannot leak samples into
//! the next session.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::parser::Reading;

/// Default number of samples retained per metric.
pub const DEFAULT_CAPACITY: usize = 10_000;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of every series, captured under a single lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub series: BTreeMap<String, Vec<Option<f64>>>,
    /// Appends (single or grouped) applied since the session began.
    pub updates: u64,
    pub epoch: u64,
}

impl Snapshot {
    pub fn series(&self, metric: &str) -> &[Option<f64>] {
        self.series.get(metric).map_or(&[], Vec::as_slice)
    }

    /// Most recent present value of a metric.
    pub fn latest(&self, metric: &str) -> Option<f64> {
        self.series(metric).iter().rev().find_map(|v| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }
}

// ---------------------------------------------------------------------------
// SeriesStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    series: BTreeMap<String, VecDeque<Option<f64>>>,
    updates: u64,
    epoch: u64,
}

/// Rolling window of the most recent samples of each metric.
#[derive(Debug)]
pub struct SeriesStore {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl SeriesStore {
    /// Create an empty store. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append one sample, evicting the oldest when at capacity.
    pub fn append(&self, metric: &str, value: Option<f64>) {
        let mut inner = self.lock();
        push_bounded(&mut inner, self.capacity, metric, value);
        inner.updates += 1;
    }

    /// Append a set of time-aligned samples as one indivisible update.
    pub fn append_group(&self, readings: &[Reading]) {
        if readings.is_empty() {
            return;
        }
        let mut inner = self.lock();
        for &(metric, value) in readings {
            push_bounded(&mut inner, self.capacity, metric, value);
        }
        inner.updates += 1;
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            series: inner
                .series
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                .collect(),
            updates: inner.updates,
            epoch: inner.epoch,
        }
    }

    /// Empty every series, keeping the metric keys.
    pub fn clear(&self) {
        let mut inner = self.lock();
        clear_inner(&mut inner);
    }

    /// Start a new session: clear all data, key the store by `metrics`, and
    /// return the only writer that may append from now on.
    pub fn begin_session(self: &Arc<Self>, metrics: &[&str]) -> StoreWriter {
        let mut inner = self.lock();
        clear_inner(&mut inner);
        inner.series = metrics
            .iter()
            .map(|m| (m.to_string(), VecDeque::new()))
            .collect();
        inner.epoch += 1;
        StoreWriter {
            store: Arc::clone(self),
            epoch: inner.epoch,
        }
    }

    /// Retire the current writer without clearing data, so the last session
    /// stays visible while nothing can append to it.
    pub fn seal(&self) {
        self.lock().epoch += 1;
    }
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn clear_inner(inner: &mut Inner) {
    for series in inner.series.values_mut() {
        series.clear();
    }
    inner.updates = 0;
}

fn push_bounded(inner: &mut Inner, capacity: usize, metric: &str, value: Option<f64>) {
    if let Some(series) = inner.series.get_mut(metric) {
        if series.len() >= capacity {
            series.pop_front();
        }
        series.push_back(value);
        return;
    }
    inner
        .series
        .insert(metric.to_string(), VecDeque::from([value]));
}

// ---------------------------------------------------------------------------
// StoreWriter
// ---------------------------------------------------------------------------

/// Append handle bound to one session epoch.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    store: Arc<SeriesStore>,
    epoch: u64,
}

impl StoreWriter {
    /// Append one sample. Returns false if this writer's session is over.
    pub fn append(&self, metric: &str, value: Option<f64>) -> bool {
        let mut inner = self.store.lock();
        if inner.epoch != self.epoch {
            return false;
        }
        push_bounded(&mut inner, self.store.capacity, metric, value);
        inner.updates += 1;
        true
    }

    /// Append a group atomically. Returns false if this writer's session is over.
    pub fn append_group(&self, readings: &[Reading]) -> bool {
        self.append_groups([readings])
    }

    /// Append several groups (e.g. every new log row of one poll) as a single
    /// update. Returns false if this writer's session is over.
    pub fn append_groups<'a, I>(&self, groups: I) -> bool
    where
        I: IntoIterator<Item = &'a [Reading]>,
    {
        let mut inner = self.store.lock();
        if inner.epoch != self.epoch {
            return false;
        }
        let mut touched = false;
        for readings in groups {
            for &(metric, value) in readings {
                push_bounded(&mut inner, self.store.capacity, metric, value);
                touched = true;
            }
        }
        if touched {
            inner.updates += 1;
        }
        true
    }

    pub fn is_current(&self) -> bool {
        self.store.lock().epoch == self.epoch
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn append_evicts_oldest_at_capacity() {
        let store = SeriesStore::new(3);
        for i in 0..5 {
            store.append("RTT", Some(i as f64));
        }
        let snap = store.snapshot();
        assert_eq!(snap.series("RTT"), &[Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(snap.updates, 5);
    }

    #[test]
    fn length_stays_at_capacity() {
        let store = SeriesStore::new(100);
        for i in 0..1000 {
            store.append("RTT", Some(i as f64));
            assert!(store.snapshot().series("RTT").len() <= 100);
        }
        assert_eq!(store.snapshot().series("RTT").len(), 100);
    }

    #[test]
    fn absent_samples_keep_series_aligned() {
        let store = SeriesStore::new(10);
        store.append_group(&[("TX", Some(1.0)), ("RSSI", None)]);
        store.append_group(&[("TX", None), ("RSSI", Some(-70.0))]);
        let snap = store.snapshot();
        assert_eq!(snap.series("TX").len(), snap.series("RSSI").len());
        assert_eq!(snap.latest("TX"), Some(1.0));
        assert_eq!(snap.latest("RSSI"), Some(-70.0));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let store = SeriesStore::new(0);
        store.append("RTT", Some(1.0));
        store.append("RTT", Some(2.0));
        assert_eq!(store.snapshot().series("RTT"), &[Some(2.0)]);
    }

    #[test]
    fn clear_keeps_keys() {
        let store = Arc::new(SeriesStore::new(10));
        let writer = store.begin_session(&["RTT", "TX"]);
        assert!(writer.append("RTT", Some(1.0)));
        store.clear();
        let snap = store.snapshot();
        assert!(snap.is_empty());
        assert_eq!(snap.series.len(), 2);
        assert_eq!(snap.updates, 0);
    }

    #[test]
    fn begin_session_rejects_older_writers() {
        let store = Arc::new(SeriesStore::new(10));
        let old = store.begin_session(&["RTT"]);
        assert!(old.append("RTT", Some(1.0)));

        let new = store.begin_session(&["RTT"]);
        assert!(!old.append("RTT", Some(99.0)));
        assert!(!old.append_group(&[("RTT", Some(99.0))]));
        assert!(!old.is_current());
        assert!(new.append("RTT", Some(2.0)));

        assert_eq!(store.snapshot().series("RTT"), &[Some(2.0)]);
    }

    #[test]
    fn seal_keeps_data_but_blocks_writer() {
        let store = Arc::new(SeriesStore::new(10));
        let writer = store.begin_session(&["RTT"]);
        writer.append("RTT", Some(1.0));
        store.seal();
        assert!(!writer.append("RTT", Some(2.0)));
        assert_eq!(store.snapshot().series("RTT"), &[Some(1.0)]);
    }

    #[test]
    fn append_groups_counts_one_update() {
        let store = Arc::new(SeriesStore::new(10));
        let writer = store.begin_session(&["RTT", "TX"]);
        let rows: Vec<Vec<Reading>> = vec![
            vec![("RTT", Some(1.0)), ("TX", Some(10.0))],
            vec![("RTT", Some(2.0)), ("TX", None)],
        ];
        assert!(writer.append_groups(rows.iter().map(Vec::as_slice)));
        let snap = store.snapshot();
        assert_eq!(snap.series("RTT"), &[Some(1.0), Some(2.0)]);
        assert_eq!(snap.series("TX"), &[Some(10.0), None]);
        assert_eq!(snap.updates, 1);

        assert!(writer.append_groups(std::iter::empty()));
        assert_eq!(store.snapshot().updates, 1);
    }

    #[test]
    fn snapshot_never_sees_torn_group() {
        let store = Arc::new(SeriesStore::new(64));
        let writer = store.begin_session(&["A", "B", "C"]);
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..20_000 {
                    let v = Some(i as f64);
                    writer.append_group(&[("A", v), ("B", v), ("C", v)]);
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        while !done.load(Ordering::SeqCst) {
            let snap = store.snapshot();
            let a = snap.series("A");
            assert_eq!(a.len(), snap.series("B").len());
            assert_eq!(a.len(), snap.series("C").len());
            assert_eq!(a.last(), snap.series("B").last());
            assert_eq!(a.last(), snap.series("C").last());
        }
        producer.join().unwrap();
    }
}
