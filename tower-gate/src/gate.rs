use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::time::sleep;
use tokio::time::timeout;

use gate_limit::Decision;
use gate_limit::SlidingWindowLimiter;
use gate_limit::StoreError;

use crate::error::GateError;

/// Subject ids longer than this are treated as malformed. Identity-provider
/// ids are short opaque tokens; anything bigger is a caller bug.
const MAX_SUBJECT_BYTES: usize = 256;

/// What the gate does when the window store cannot be consulted.
///
/// This is an explicit deployment decision, not a fallback. Both paths emit
/// a degraded-mode signal so operators can see unenforced quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailPolicy {
    /// Reject the request. The safer default for abuse prevention.
    #[default]
    Closed,
    /// Admit the request unmetered. Preferred when the guarded resource is
    /// non-critical and availability outranks strict quota enforcement.
    Open,
}

#[derive(Clone, Debug)]
struct AdmissionGateMetrics {
    admitted: Counter<u64>,
    denied: Counter<u64>,
    degraded: Counter<u64>,
}

/// The integration point between a request handler and the limiter.
///
/// Owns the store-consultation policy: a short timeout on every store
/// round-trip, exactly one retry with a short backoff, then the configured
/// [`FailPolicy`]. Decisions themselves come from the wrapped
/// [`SlidingWindowLimiter`].
#[derive(Debug)]
pub struct AdmissionGate {
    limiter: SlidingWindowLimiter,
    fail_policy: FailPolicy,
    store_timeout: Duration,
    retry_backoff: Duration,
    instruments: AdmissionGateMetrics,
}

impl AdmissionGate {
    /// Creates a gate around `limiter` with the default policy: fail
    /// closed, 50ms store timeout, 25ms retry backoff.
    pub fn new(limiter: SlidingWindowLimiter) -> Self {
        let meter = global::meter("admission_gate");
        let instruments = AdmissionGateMetrics {
            admitted: meter.u64_counter("gate_admitted").build(),
            denied: meter.u64_counter("gate_denied").build(),
            degraded: meter.u64_counter("gate_degraded").build(),
        };

        Self {
            limiter,
            fail_policy: FailPolicy::default(),
            store_timeout: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(25),
            instruments,
        }
    }

    /// Sets the behavior when the store is unreachable.
    pub fn with_fail_policy(mut self, fail_policy: FailPolicy) -> Self {
        self.fail_policy = fail_policy;
        self
    }

    /// Sets the per-round-trip store timeout. Keep this well under the
    /// request latency budget; a timeout counts as the store being
    /// unavailable.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Sets the pause before the single store retry.
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// Checks `subject` against its quota.
    ///
    /// Returns the raw [`Decision`], allowed or denied; only subject
    /// validation failures and (under [`FailPolicy::Closed`]) store
    /// unavailability surface as errors.
    pub async fn check(&self, subject: &str) -> Result<Decision, GateError> {
        if subject.trim().is_empty() || subject.len() > MAX_SUBJECT_BYTES {
            // Deterministic caller bug; decided locally, no store traffic.
            return Err(GateError::InvalidSubject);
        }

        let decision = match self.consult(subject).await {
            Ok(decision) => decision,
            Err(first) => {
                // One retry with a short backoff, never more; the request's
                // latency budget cannot absorb an unavailable store.
                tracing::debug!(error = %first, "window store check failed; retrying once");
                sleep(self.retry_backoff).await;
                match self.consult(subject).await {
                    Ok(decision) => decision,
                    Err(err) => return self.degraded(err),
                }
            }
        };

        if decision.allowed {
            self.instruments.admitted.add(1, &[]);
        } else {
            self.instruments.denied.add(1, &[]);
        }
        Ok(decision)
    }

    /// [`check`](Self::check), with denial mapped to
    /// [`GateError::RateLimited`] carrying retry-after metadata. This is
    /// the form the middleware consumes.
    pub async fn admit(&self, subject: &str) -> Result<Decision, GateError> {
        let decision = self.check(subject).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            let now = self.limiter.now_ms();
            Err(GateError::RateLimited {
                reset_at_ms: decision.reset_at_ms,
                retry_after: Duration::from_millis(decision.reset_at_ms.saturating_sub(now)),
            })
        }
    }

    async fn consult(&self, subject: &str) -> Result<Decision, StoreError> {
        match timeout(self.store_timeout, self.limiter.check(subject)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "store check exceeded {:?}",
                self.store_timeout
            ))),
        }
    }

    /// Applies the fail policy after the retry budget is spent.
    fn degraded(&self, err: StoreError) -> Result<Decision, GateError> {
        match self.fail_policy {
            FailPolicy::Open => {
                self.instruments
                    .degraded
                    .add(1, &[KeyValue::new("policy", "open")]);
                tracing::warn!(
                    error = %err,
                    "window store unavailable; admitting unmetered (fail-open)"
                );
                Ok(self.limiter.unmetered())
            }
            FailPolicy::Closed => {
                self.instruments
                    .degraded
                    .add(1, &[KeyValue::new("policy", "closed")]);
                tracing::warn!(
                    error = %err,
                    "window store unavailable; rejecting (fail-closed)"
                );
                Err(GateError::StoreUnavailable(err))
            }
        }
    }
}
