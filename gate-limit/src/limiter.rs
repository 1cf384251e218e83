use std::sync::Arc;

use super::Clock;
use super::Decision;
use super::LimiterConfig;
use super::StoreError;
use super::SystemClock;
use super::WindowStore;

/// How many read/claim cycles a single check may spend losing races before
/// it gives up and denies. The bound only bites under pathological
/// same-subject contention; it can never cause over-admission, and total
/// claim successes within a window are capped by the quota anyway.
const CLAIM_ATTEMPTS: usize = 64;

/// The sliding-window decision engine.
///
/// Partitions time into buckets of the configured window length and, for
/// each check, weights the previous bucket's count by how much of it still
/// falls inside the trailing window:
///
/// ```text
/// effective = previous * overlap + current
/// ```
///
/// A naive fixed window admits up to twice the quota across a bucket
/// boundary; the weighted estimate bounds any rolling window to roughly the
/// quota without storing a timestamp per event.
///
/// The limiter holds no mutable state. A slot is claimed with the store's
/// compare-and-increment, re-reading after every lost race, so concurrent
/// checks for one subject can never jointly overshoot the quota. Denied
/// checks never increment anything.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn WindowStore>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Creates a limiter over `store`, reading the system clock.
    pub fn new(store: Arc<dyn WindowStore>, config: LimiterConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock. Tests drive a [`ManualClock`](super::ManualClock)
    /// through this.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The current reading of the limiter's clock, in epoch milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Checks whether one event for `subject` may be admitted now,
    /// consuming a quota slot if so.
    ///
    /// Consumption is final: quota claimed here is not refunded if the
    /// caller's request is later cancelled or fails downstream. Refunds
    /// would let retry storms sail past the limit.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] untouched; the caller owns the policy for
    /// an unreachable store.
    pub async fn check(&self, subject: &str) -> Result<Decision, StoreError> {
        let max = self.config.max_events().get() as u64;
        let window_ms = self.config.window_ms();
        let now = self.clock.now_ms();
        let bucket = now / window_ms;
        let bucket_start = bucket * window_ms;
        let reset_at_ms = bucket_start + window_ms;

        // Fraction of the previous bucket still inside the trailing window.
        let overlap = 1.0 - (now - bucket_start) as f64 / window_ms as f64;

        for _ in 0..CLAIM_ATTEMPTS {
            let counts = self.store.counts(subject, bucket).await?;
            let effective = counts.previous as f64 * overlap + counts.current as f64;

            // The quota is inclusive: an estimate equal to the limit denies.
            if effective >= max as f64 {
                return Ok(Decision {
                    allowed: false,
                    remaining: 0,
                    reset_at_ms,
                });
            }

            if self
                .store
                .compare_and_increment(subject, bucket, counts.current, self.config.window())
                .await?
            {
                let remaining = max
                    .saturating_sub(effective.floor() as u64)
                    .saturating_sub(1);
                return Ok(Decision {
                    allowed: true,
                    remaining,
                    reset_at_ms,
                });
            }
            // Lost the slot to a concurrent check; re-read and re-decide.
        }

        // Claim budget spent. Denying is the conservative end; admitting
        // blind could overshoot the quota.
        Ok(Decision {
            allowed: false,
            remaining: 0,
            reset_at_ms,
        })
    }

    /// The decision reported when an event is admitted without consulting
    /// the store: the shape of a first event in a window starting now.
    pub fn unmetered(&self) -> Decision {
        let window_ms = self.config.window_ms();
        let bucket = self.clock.now_ms() / window_ms;
        Decision {
            allowed: true,
            remaining: (self.config.max_events().get() as u64).saturating_sub(1),
            reset_at_ms: (bucket + 1) * window_ms,
        }
    }
}
