use gate_limit::StoreError;

/// Errors produced by the admission stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    /// The subject's quota is exhausted for the current window.
    ///
    /// User-recoverable: wait until `reset_at_ms` and try again. This is a
    /// routine outcome, never an application error.
    /// When the `axum` feature is enabled, this converts to
    /// `429 Too Many Requests` with a `Retry-After` header.
    #[error("rate limit exceeded; quota resets in {retry_after:?}")]
    RateLimited {
        /// Epoch milliseconds at which the quota next replenishes.
        reset_at_ms: u64,
        /// How long the client should wait before retrying.
        retry_after: std::time::Duration,
    },

    /// The window store could not be consulted and the gate is configured
    /// to fail closed.
    ///
    /// Infrastructure failure, always logged as a degraded-mode event.
    /// When the `axum` feature is enabled, this converts to
    /// `503 Service Unavailable`.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// The caller supplied an empty or malformed subject id.
    ///
    /// A programming error upstream of the gate; rejected without ever
    /// contacting the store. When the `axum` feature is enabled, this
    /// converts to `400 Bad Request`.
    #[error("invalid rate-limit subject")]
    InvalidSubject,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to
    /// `500 Internal Server Error`.
    #[error("internal service error: {0}")]
    Inner(String),
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, headers) = match self {
            Self::RateLimited { retry_after, .. } => {
                let secs = retry_after.as_secs().max(1);
                let val = axum::http::HeaderValue::from(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), None),
            Self::InvalidSubject => (StatusCode::BAD_REQUEST, self.to_string(), None),
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
