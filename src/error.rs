// Relay error taxonomy and its mapping to JSON HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Terminal failure of a single relay request. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Missing url parameter")]
    MissingParameter,

    /// A query parameter was present but not usable (e.g. not an absolute URL).
    #[error("Invalid {0} parameter")]
    InvalidParameter(&'static str),

    #[error("Host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("Upstream error: {}", .status.as_u16())]
    Upstream { status: StatusCode },

    /// Anything unexpected while fetching, reading or rewriting. The cause is
    /// logged and never sent to the client.
    #[error("Proxy error: {0:#}")]
    Proxy(#[from] anyhow::Error),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameter | Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::HostNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::Upstream { status } => *status,
            Self::Proxy(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the `{"error": ...}` body.
    pub fn client_message(&self) -> String {
        match self {
            Self::HostNotAllowed(_) => "Host not allowed".to_string(),
            Self::Proxy(_) => "Proxy error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        if let Self::Proxy(cause) = &self {
            error!("relay failed: {:#}", cause);
        }
        (self.status(), Json(json!({ "error": self.client_message() }))).into_response()
    }
}
