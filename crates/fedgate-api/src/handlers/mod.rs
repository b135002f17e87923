//! HTTP handlers

pub mod authorize;
pub mod chooser;
pub mod health;
pub mod login;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::error;

use fedgate_core::FedgateError;

use crate::oauth::ProtocolError;

/// Why an authorize-family request could not complete. Protocol errors go
/// back to the client per OAuth2; internal errors stay generic with detail
/// only in the logs.
pub(crate) enum AuthorizeFailure {
    Protocol(ProtocolError),
    Internal(FedgateError),
}

impl From<ProtocolError> for AuthorizeFailure {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<FedgateError> for AuthorizeFailure {
    fn from(err: FedgateError) -> Self {
        Self::Internal(err)
    }
}

/// The single error-writing path for the authorize-family handlers.
pub(crate) fn failure_response(failure: AuthorizeFailure) -> Response {
    match failure {
        AuthorizeFailure::Protocol(err) => match err.redirect_location() {
            Some(location) => found(&location),
            None => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": err.code.as_str(),
                    "error_description": err.description,
                })),
            )
                .into_response(),
        },
        AuthorizeFailure::Internal(err) => {
            error!(error = %err, "internal error while handling authorize request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "server_error",
                    "error_description": "an internal error occurred",
                })),
            )
                .into_response()
        }
    }
}

/// A 302 Found redirect; OAuth2 responses use 302 rather than 303/307.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
