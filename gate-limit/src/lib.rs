//! # gate-limit
//!
//! `gate-limit` provides per-subject sliding window admission control backed
//! by a shared counter store.
//!
//! ## Core Philosophy
//!
//! Request handlers may run on any number of threads, processes, or machines,
//! so the limiter itself holds no mutable state. All cross-request
//! coordination happens through the atomic primitives of a [`WindowStore`]:
//! the limiter reads the current window occupancy and claims a slot with a
//! compare-and-increment, retrying on lost races. Two simultaneous requests
//! from the same subject can never both be admitted past the quota.
//!
//! ## Key Concepts
//!
//! * **Subject**: the opaque string identifying the rate-limited entity
//!   (typically an authenticated user id).
//! * **Sliding Window**: time is partitioned into fixed buckets; the
//!   effective count weights the previous bucket by how much of it still
//!   falls inside the trailing window, bounding boundary bursts.
//! * **Store Seam**: any backend with an atomic compare-and-increment
//!   satisfies [`WindowStore`]. [`MemoryWindowStore`] ships for single-node
//!   deployments and tests.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use gate_limit::LimiterConfig;
//! use gate_limit::MemoryWindowStore;
//! use gate_limit::SlidingWindowLimiter;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = LimiterConfig::new(
//!     NonZeroUsize::new(6).unwrap(),
//!     Duration::from_secs(10),
//! );
//! let limiter = SlidingWindowLimiter::new(Arc::new(MemoryWindowStore::new()), config);
//!
//! let decision = limiter.check("user_2NNE").await.unwrap();
//! assert!(decision.allowed);
//! # }
//! ```

use std::num::NonZeroUsize;
use std::time::Duration;

mod clock;
mod limiter;
mod memory;
mod store;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use limiter::SlidingWindowLimiter;
pub use memory::MemoryWindowStore;
pub use store::StoreError;
pub use store::WindowCounts;
pub use store::WindowStore;

/// The outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the event was admitted.
    pub allowed: bool,
    /// Slots left in the window after this check.
    pub remaining: u64,
    /// Milliseconds since the Unix epoch at which the quota next replenishes.
    pub reset_at_ms: u64,
}

/// Process-wide limiter configuration.
///
/// Constructed once at startup and immutable thereafter; every process
/// sharing a store must use the same values or bucket accounting diverges.
#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    max_events: NonZeroUsize,
    window: Duration,
}

impl LimiterConfig {
    /// Creates a new `LimiterConfig`.
    ///
    /// # Arguments
    ///
    /// * `max_events` - The quota admitted within one window.
    /// * `window` - The window length. Sub-millisecond windows are rounded
    ///   up to one millisecond, the accounting granularity.
    pub fn new(max_events: NonZeroUsize, window: Duration) -> Self {
        Self { max_events, window }
    }

    /// The quota admitted within one window.
    pub fn max_events(&self) -> NonZeroUsize {
        self.max_events
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The window length in milliseconds, never zero.
    pub fn window_ms(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }
}
