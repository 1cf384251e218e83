use std::sync::Arc;

use tower::Layer;

use crate::AdmissionGate;
use crate::service::AdmissionService;

/// Applies per-subject write admission to requests.
///
/// One layer holds one [`AdmissionGate`]; every service built from it
/// shares that gate, and through it the same window store, so quotas hold
/// across clones.
#[derive(Debug)]
pub struct AdmissionLayer<X> {
    gate: Arc<AdmissionGate>,
    extract: X,
}

impl<X> AdmissionLayer<X> {
    /// Create an AdmissionLayer.
    ///
    /// `extract` pulls the authenticated subject id off each request.
    pub fn new(gate: Arc<AdmissionGate>, extract: X) -> Self {
        AdmissionLayer { gate, extract }
    }
}

impl<X> Clone for AdmissionLayer<X>
where
    X: Clone,
{
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            extract: self.extract.clone(),
        }
    }
}

impl<S, X> Layer<S> for AdmissionLayer<X>
where
    X: Clone,
{
    type Service = AdmissionService<S, X>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService::new(service, Arc::clone(&self.gate), self.extract.clone())
    }
}
