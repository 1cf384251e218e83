use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

/// Counter snapshot for one subject: the bucket being checked and the one
/// immediately before it. Buckets with no record read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    /// Admitted events recorded in the requested bucket.
    pub current: u64,
    /// Admitted events recorded in the preceding bucket.
    pub previous: u64,
}

/// Errors surfaced by a [`WindowStore`] backend.
///
/// The store is an external dependency; being unreachable, slow, or flaky is
/// an infrastructure condition and must never be conflated with "limit
/// exceeded". Callers decide between failing open and failing closed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached, timed out, or returned a
    /// transient error.
    #[error("window store unavailable: {0}")]
    Unavailable(String),
}

/// Shared counter storage keyed by `(subject, bucket)`.
///
/// This is the only coordination point between request handlers: the limiter
/// keeps no mutable state of its own, so the store's atomicity is what makes
/// same-subject admission race-free. Implementations must guarantee that
/// [`compare_and_increment`](WindowStore::compare_and_increment) is atomic
/// with respect to concurrent callers on the same key. Reads across the
/// current and previous buckets are not required to be transactionally
/// joined; the sliding-window estimate tolerates that bounded inaccuracy.
///
/// Counter state for a subject is independent of every other subject's; no
/// multi-key transactions are needed.
#[async_trait]
pub trait WindowStore: Debug + Send + Sync {
    /// Fetches the counters for `bucket` and `bucket - 1`.
    ///
    /// Missing records read as zero. A pure read must not create state.
    async fn counts(&self, subject: &str, bucket: u64) -> Result<WindowCounts, StoreError>;

    /// Atomically bumps the counter for `(subject, bucket)` from `expected`
    /// to `expected + 1`, initializing absent state at zero.
    ///
    /// Returns `false` when another caller raced past `expected` first; the
    /// caller re-reads and re-decides. `ttl` bounds how long the bucket may
    /// outlive its window before the store may discard it.
    async fn compare_and_increment(
        &self,
        subject: &str,
        bucket: u64,
        expected: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}
