use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::StoreError;
use super::WindowCounts;
use super::WindowStore;

/// Per-subject window slots.
///
/// `bucket` is the absolute index of the bucket `current` counts;
/// `previous` belongs to `bucket - 1`.
#[derive(Debug)]
struct Slots {
    bucket: AtomicU64,
    current: AtomicU64,
    previous: AtomicU64,
    /// Epoch milliseconds after which this subject is eligible for eviction.
    expires_ms: AtomicU64,
}

impl Slots {
    fn new(bucket: u64) -> Self {
        Self {
            bucket: AtomicU64::new(bucket),
            current: AtomicU64::new(0),
            previous: AtomicU64::new(0),
            expires_ms: AtomicU64::new(0),
        }
    }
}

/// A single-process [`WindowStore`] backed by a concurrent hash map.
///
/// Counter updates are plain atomic compare-exchanges; window rotation uses
/// a compare-exchange on the bucket index, so the hot path never takes a
/// lock beyond the map's shard guards. This store cannot be shared across
/// processes; it exists for single-node deployments and tests. Production
/// multi-process deployments plug a shared backend into the same trait.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    slots: DashMap<String, Slots>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subjects currently holding slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Evicts every subject whose record expired at or before `now_ms`.
    ///
    /// The store spawns no threads of its own; call this on whatever cadence
    /// suits the deployment. Returns the number of subjects removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slots| slots.expires_ms.load(Ordering::Acquire) > now_ms);
        before - self.slots.len()
    }

    /// Advances `slots` to `bucket` if it is ahead of the stored index.
    ///
    /// An advance of one bucket migrates `current` into `previous`; a longer
    /// gap means the previous bucket saw no events, so both counters clear.
    fn rotate(slots: &Slots, bucket: u64) {
        let mut stored = slots.bucket.load(Ordering::Acquire);
        while bucket > stored {
            if slots
                .bucket
                .compare_exchange(stored, bucket, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                let prev = if bucket == stored + 1 {
                    slots.current.swap(0, Ordering::SeqCst)
                } else {
                    slots.current.store(0, Ordering::SeqCst);
                    0
                };
                slots.previous.store(prev, Ordering::SeqCst);
                return;
            }
            // Another caller moved the index; re-check against the new one.
            stored = slots.bucket.load(Ordering::Acquire);
        }
    }

    fn bump(slots: &Slots, bucket: u64, expected: u64, ttl_ms: u64) -> bool {
        Self::rotate(slots, bucket);
        let swapped = slots
            .current
            .compare_exchange(expected, expected + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        if swapped {
            // The record matters for the checked bucket and one more window
            // while it serves as `previous`, then it may be dropped.
            let expires = (bucket + 2).saturating_mul(ttl_ms);
            slots.expires_ms.fetch_max(expires, Ordering::SeqCst);
        }
        swapped
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn counts(&self, subject: &str, bucket: u64) -> Result<WindowCounts, StoreError> {
        // A subject with no record reads as zero; reads never create state.
        let Some(slots) = self.slots.get(subject) else {
            return Ok(WindowCounts::default());
        };
        Self::rotate(&slots, bucket);
        // A caller whose clock lags the stored index gets the newest view;
        // skew degrades accuracy, not safety.
        Ok(WindowCounts {
            current: slots.current.load(Ordering::Acquire),
            previous: slots.previous.load(Ordering::Acquire),
        })
    }

    async fn compare_and_increment(
        &self,
        subject: &str,
        bucket: u64,
        expected: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        // Fast path avoids the shard write lock for known subjects.
        if let Some(slots) = self.slots.get(subject) {
            return Ok(Self::bump(&slots, bucket, expected, ttl_ms));
        }
        let slots = self
            .slots
            .entry(subject.to_string())
            .or_insert_with(|| Slots::new(bucket));
        Ok(Self::bump(&slots, bucket, expected, ttl_ms))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn absent_subject_reads_zero_and_creates_nothing() {
        let store = MemoryWindowStore::new();

        let counts = store.counts("u1", 3).await.unwrap();
        assert_eq!(counts, WindowCounts::default());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn increments_chain_through_expected_values() {
        let store = MemoryWindowStore::new();

        for expected in 0..5 {
            assert!(
                store
                    .compare_and_increment("u1", 0, expected, TTL)
                    .await
                    .unwrap()
            );
        }
        let counts = store.counts("u1", 0).await.unwrap();
        assert_eq!(counts.current, 5);
        assert_eq!(counts.previous, 0);
    }

    #[tokio::test]
    async fn stale_expected_loses_the_race() {
        let store = MemoryWindowStore::new();

        assert!(store.compare_and_increment("u1", 0, 0, TTL).await.unwrap());
        // A second caller that also observed zero must be told to re-read.
        assert!(!store.compare_and_increment("u1", 0, 0, TTL).await.unwrap());
        assert_eq!(store.counts("u1", 0).await.unwrap().current, 1);
    }

    #[tokio::test]
    async fn single_step_rotation_keeps_previous() {
        let store = MemoryWindowStore::new();

        for expected in 0..3 {
            store
                .compare_and_increment("u1", 5, expected, TTL)
                .await
                .unwrap();
        }

        let counts = store.counts("u1", 6).await.unwrap();
        assert_eq!(counts.previous, 3);
        assert_eq!(counts.current, 0);
    }

    #[tokio::test]
    async fn gap_rotation_clears_both_counters() {
        let store = MemoryWindowStore::new();

        for expected in 0..3 {
            store
                .compare_and_increment("u1", 5, expected, TTL)
                .await
                .unwrap();
        }

        let counts = store.counts("u1", 9).await.unwrap();
        assert_eq!(counts, WindowCounts::default());
    }

    #[tokio::test]
    async fn subjects_are_independent() {
        let store = MemoryWindowStore::new();

        store.compare_and_increment("u1", 0, 0, TTL).await.unwrap();
        store.compare_and_increment("u1", 0, 1, TTL).await.unwrap();
        store.compare_and_increment("u2", 0, 0, TTL).await.unwrap();

        assert_eq!(store.counts("u1", 0).await.unwrap().current, 2);
        assert_eq!(store.counts("u2", 0).await.unwrap().current, 1);
    }

    #[tokio::test]
    async fn sweep_evicts_expired_subjects() {
        let store = MemoryWindowStore::new();

        // Bucket 0 with a 10s ttl expires at 20_000ms.
        store.compare_and_increment("old", 0, 0, TTL).await.unwrap();
        // Bucket 5 expires at 70_000ms.
        store.compare_and_increment("live", 5, 0, TTL).await.unwrap();
        assert_eq!(store.len(), 2);

        assert_eq!(store.sweep(19_999), 0);
        assert_eq!(store.sweep(20_000), 1);
        assert_eq!(store.len(), 1);
        assert!(store.counts("live", 5).await.unwrap().current == 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_count_exactly_once_each() {
        let store = Arc::new(MemoryWindowStore::new());
        let tasks = 64;

        let mut handles = vec![];
        for _ in 0..tasks {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                // Claim one slot, re-reading after every lost race.
                loop {
                    let seen = store.counts("u1", 0).await.unwrap().current;
                    if store
                        .compare_and_increment("u1", 0, seen, TTL)
                        .await
                        .unwrap()
                    {
                        break;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.counts("u1", 0).await.unwrap().current, tasks);
    }
}
