use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::future::BoxFuture;
use tower::BoxError;
use tower::Service;

use crate::AdmissionGate;
use crate::GateError;

/// Extracts the rate-limited subject from a request.
///
/// The subject must derive from the authenticated identity attached to the
/// request, never from client-controlled fields. `None` means the request
/// carries no usable identity and is rejected as
/// [`GateError::InvalidSubject`] without touching the inner service.
///
/// Closures of the right shape implement this directly:
///
/// ```rust
/// # struct Req { user_id: Option<String> }
/// let extract = |req: &Req| req.user_id.clone();
/// ```
pub trait ExtractSubject<Req> {
    fn subject(&self, req: &Req) -> Option<String>;
}

impl<Req, F> ExtractSubject<Req> for F
where
    F: Fn(&Req) -> Option<String>,
{
    fn subject(&self, req: &Req) -> Option<String> {
        self(req)
    }
}

/// Runs the admission gate ahead of the wrapped service.
///
/// Denials and store failures short-circuit before the inner call, so a
/// rejected request never consumes downstream resources.
#[derive(Debug)]
pub struct AdmissionService<S, X> {
    inner: S,
    gate: Arc<AdmissionGate>,
    extract: X,
}

impl<S, X> AdmissionService<S, X> {
    pub fn new(inner: S, gate: Arc<AdmissionGate>, extract: X) -> Self {
        Self {
            inner,
            gate,
            extract,
        }
    }
}

impl<S, X> Clone for AdmissionService<S, X>
where
    S: Clone,
    X: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gate: Arc::clone(&self.gate),
            extract: self.extract.clone(),
        }
    }
}

impl<S, X, Req> Service<Req> for AdmissionService<S, X>
where
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send,
    X: ExtractSubject<Req>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // The admission check is a store round-trip, so the decision lives
        // in the response future, not in poll_ready. Take the service that
        // was driven to readiness and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gate = Arc::clone(&self.gate);
        let subject = self.extract.subject(&req);

        Box::pin(async move {
            let subject = subject.ok_or(GateError::InvalidSubject)?;
            gate.admit(&subject).await?;
            inner.call(req).await
        })
    }
}
