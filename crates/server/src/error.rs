//! Mapping of cache failures to HTTP responses.
//!
//! Input problems are the client's fault (4xx); anything the cache or origin
//! did wrong is a 500 carrying the error's message.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use revcache_core::Error;

/// Errors surfaced by the proxy endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The token query parameter was absent or empty.
    #[error("MISSING_PARAM: {0}")]
    MissingParam(String),

    #[error(transparent)]
    Cache(#[from] Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingParam(_) => StatusCode::NOT_FOUND,
            ProxyError::Cache(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ProxyError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "rejected request");
        }
        (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], self.to_string()).into_response()
    }
}
