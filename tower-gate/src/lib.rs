//! # Tower Gate
//!
//! `tower-gate` turns the [`gate-limit`](gate_limit) sliding-window limiter
//! into write-admission control for [Tower](https://github.com/tower-rs/tower)
//! services: each request is checked against its authenticated subject's
//! quota before the inner service ever runs.
//!
//! ## The Admission Stack
//!
//! 1. **Subject extraction**: an [`ExtractSubject`] implementation pulls the
//!    authenticated subject id off the request. No subject, no service call.
//! 2. **Gatekeeping**: the [`AdmissionGate`] consults the shared window
//!    store under a short timeout, retries a failed store exactly once, and
//!    then applies the configured [`FailPolicy`].
//! 3. **Error Mapping**: denials and infrastructure failures surface as a
//!    unified, cloneable [`GateError`] domain the protocol layer can map to
//!    statuses without guesswork.
//!
//! Quota consumed by an admitted request is never refunded, even if the
//! request is cancelled or the inner service fails; consumption is
//! independent of downstream success so retry storms cannot slip the limit.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`GateError`], allowing automatic
//!   conversion to HTTP status codes (429, 503, 400, 500).

mod error;
mod gate;
mod layer;
mod service;


pub use error::GateError;
pub use gate::AdmissionGate;
pub use gate::FailPolicy;
pub use layer::AdmissionLayer;
pub use service::AdmissionService;
pub use service::ExtractSubject;
