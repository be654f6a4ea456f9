//! Bounded per-series history and the fixed 256-shard map that owns all
//! series: each shard guards its own `RwLock<HashMap<_, Arc<RwLock<_>>>>` so
//! two series that land in different shards never contend, and a series
//! gets its own lock so a writer on one series never blocks a reader on
//! another in the same shard.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crate::model::Sample;

/// Number of shards in the history map. Fixed at compile time and never
/// resized at runtime.
pub const SHARD_COUNT: usize = 256;

/// An ordered, newest-first sequence of samples for one series, bounded to
/// `max_retain` entries.
#[derive(Debug, Default)]
pub struct SeriesHistory {
    samples: VecDeque<Sample>,
}

impl SeriesHistory {
    fn new(sample: Sample) -> Self {
        let mut samples = VecDeque::with_capacity(1);
        samples.push_front(sample);
        Self { samples }
    }

    /// Prepend `sample` if it is newer than the current head, trimming the
    /// tail down to `max_retain`. Returns `false` (and leaves the deque
    /// untouched) if `sample` is not strictly newer than the head — an
    /// out-of-order arrival never mutates the series and never triggers
    /// evaluation.
    pub fn push_front_and_maintain(&mut self, sample: Sample, max_retain: usize) -> bool {
        if let Some(head) = self.samples.front() {
            if head.timestamp >= sample.timestamp {
                return false;
            }
        }

        self.samples.push_front(sample);
        while self.samples.len() > max_retain {
            self.samples.pop_back();
        }
        true
    }

    /// The newest sample, or `None` if the series has somehow gone empty
    /// (never happens for a live series created via [`HistoryShards::ingest`]).
    pub fn front(&self) -> Option<&Sample> {
        self.samples.front()
    }

    /// Lazily iterate from newest to oldest.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One of the 256 independent partitions of the series map.
#[derive(Default)]
struct Shard {
    series: RwLock<HashMap<String, Arc<RwLock<SeriesHistory>>>>,
}

/// The sharded, process-lifetime history store.
///
/// Each shard holds its own reader-writer lock; two samples whose primary
/// keys fall in different shards never contend. Allocated once at startup
/// and never resized.
pub struct HistoryShards {
    shards: Vec<Shard>,
}

impl Default for HistoryShards {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryShards {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Shard::default()).collect();
        Self { shards }
    }

    fn shard_for(&self, primary_key: &str) -> &Shard {
        &self.shards[shard_index(primary_key) as usize]
    }

    /// Push `sample` into its series, creating the series if absent.
    ///
    /// Returns `Some(series)` when the push should trigger evaluation: the
    /// sample was newer than the prior head, or the series was just
    /// created. Returns `None` when the sample was rejected as stale — the
    /// caller must not evaluate it.
    pub fn ingest(&self, sample: Sample, max_retain: usize) -> Option<Arc<RwLock<SeriesHistory>>> {
        let key = sample.primary_key();
        let shard = self.shard_for(&key);

        // Fast path: series already exists. Read lock only to fetch the
        // Arc, then mutate the series under its own lock.
        let existing = {
            let map = shard.series.read().expect("shard lock poisoned");
            map.get(&key).cloned()
        };

        if let Some(series) = existing {
            let pushed = {
                let mut guard = series.write().expect("series lock poisoned");
                guard.push_front_and_maintain(sample, max_retain)
            };
            return if pushed { Some(series) } else { None };
        }

        // Slow path: no series yet. Take the write lock and create one,
        // re-checking in case another thread raced us to it.
        let mut map = shard.series.write().expect("shard lock poisoned");
        if let Some(series) = map.get(&key) {
            let series = series.clone();
            drop(map);
            let pushed = {
                let mut guard = series.write().expect("series lock poisoned");
                guard.push_front_and_maintain(sample, max_retain)
            };
            return if pushed { Some(series) } else { None };
        }

        let series = Arc::new(RwLock::new(SeriesHistory::new(sample)));
        map.insert(key, series.clone());
        Some(series)
    }

    pub fn get(&self, primary_key: &str) -> Option<Arc<RwLock<SeriesHistory>>> {
        let shard = self.shard_for(primary_key);
        let map = shard.series.read().expect("shard lock poisoned");
        map.get(primary_key).cloned()
    }

    /// Remove every series whose newest sample is older than `horizon`
    /// (unix seconds), returning the number of series removed.
    ///
    /// Collection and deletion are two distinct locking phases: the first
    /// pass only takes read locks, the second only write locks, and at
    /// delete time each candidate's head is rechecked against `horizon` in
    /// case it gained a fresh sample in between.
    pub fn clean_stale(&self, horizon: i64) -> usize {
        let mut removed = 0;

        for shard in &self.shards {
            let stale_keys: Vec<String> = {
                let map = shard.series.read().expect("shard lock poisoned");
                map.iter()
                    .filter_map(|(key, series)| {
                        let series = series.read().expect("series lock poisoned");
                        match series.front() {
                            Some(front) if front.timestamp < horizon => Some(key.clone()),
                            _ => None,
                        }
                    })
                    .collect()
            };

            if stale_keys.is_empty() {
                continue;
            }

            let mut map = shard.series.write().expect("shard lock poisoned");
            for key in stale_keys {
                let still_stale = map
                    .get(&key)
                    .map(|series| {
                        let series = series.read().expect("series lock poisoned");
                        match series.front() {
                            Some(front) => front.timestamp < horizon,
                            None => true,
                        }
                    })
                    .unwrap_or(false);

                if still_stale && map.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }

        removed
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// FNV-1a 64-bit hash of the primary key, formatted as lowercase hex. The
/// shard index is the numeric value of its first two hex characters.
pub fn fingerprint_hex(primary_key: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in primary_key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

/// The shard index (0..256) for a primary key: the first byte of its
/// fingerprint, i.e. the numeric value of the first two hex characters.
pub fn shard_index(primary_key: &str) -> u8 {
    let hex = fingerprint_hex(primary_key);
    u8::from_str_radix(&hex[0..2], 16).expect("fingerprint_hex always emits valid hex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn sample(ts: i64, value: f64) -> Sample {
        Sample {
            endpoint: "host01".into(),
            metric: "cpu.idle".into(),
            tags: Map::new(),
            timestamp: ts,
            value,
        }
    }

    #[test]
    fn push_front_rejects_non_newer() {
        let mut history = SeriesHistory::new(sample(5, 1.0));
        assert!(!history.push_front_and_maintain(sample(5, 2.0), 10));
        assert!(!history.push_front_and_maintain(sample(4, 2.0), 10));
        assert_eq!(history.front().unwrap().timestamp, 5);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn push_front_trims_tail() {
        let mut history = SeriesHistory::new(sample(1, 1.0));
        for ts in 2..=5 {
            assert!(history.push_front_and_maintain(sample(ts, ts as f64), 3));
        }
        assert_eq!(history.len(), 3);
        let values: Vec<i64> = history.iter_newest_first().map(|s| s.timestamp).collect();
        assert_eq!(values, vec![5, 4, 3]);
    }

    #[test]
    fn ingest_creates_then_rejects_stale() {
        let shards = HistoryShards::new();
        let s1 = shards.ingest(sample(1, 1.0), 5).expect("new series evaluates");
        assert_eq!(s1.read().unwrap().len(), 1);

        assert!(shards.ingest(sample(1, 99.0), 5).is_none());
        assert!(shards.ingest(sample(0, 99.0), 5).is_none());

        let s2 = shards.ingest(sample(2, 2.0), 5).expect("newer sample evaluates");
        assert_eq!(s2.read().unwrap().len(), 2);
    }

    #[test]
    fn clean_stale_removes_only_old_series() {
        let shards = HistoryShards::new();
        let stale_key = sample(1, 1.0).primary_key();
        shards.ingest(sample(1, 1.0), 5);

        let mut fresh = sample(100, 1.0);
        fresh.metric = "mem.used".into();
        let fresh_key = fresh.primary_key();
        shards.ingest(fresh, 5);

        let removed = shards.clean_stale(50);
        assert_eq!(removed, 1);
        assert!(shards.get(&stale_key).is_none());
        assert!(shards.get(&fresh_key).is_some());
    }

    #[test]
    fn shard_index_stable_and_in_range() {
        let key = "host01/cpu.idle/a=1";
        let idx1 = shard_index(key);
        let idx2 = shard_index(key);
        assert_eq!(idx1, idx2);
        // u8 is always < 256; this just documents the invariant.
        let _: u8 = idx1;
    }
}
