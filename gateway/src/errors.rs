use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Update script unavailable: {0}")]
    Script(#[from] std::io::Error),
}

/// No upstream response exists to mirror, so callers only see a generic 500.
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let message = match self {
            RelayError::Upstream(_) => "Error reaching internal service",
            RelayError::Script(_) => "Error sending update script",
        };
        (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
    }
}
