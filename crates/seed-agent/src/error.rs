//! API error types and responses.
//!
//! Every failure is rendered as `{"Code": "ERROR", "Message": ..., "Details": ...}`,
//! the shape the control plane already parses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use seed_agent_control::ControlError;
use seed_agent_core::CoreError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request did not carry the agent's token.
    #[error("Invalid token")]
    InvalidToken,

    /// A path parameter could not be parsed.
    #[error("invalid {name}: {value}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The value as received.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// The state machine rejected or failed the request.
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    /// Wrap a parse failure of the named path parameter.
    #[must_use]
    pub fn invalid(name: &'static str, value: &str, err: &CoreError) -> Self {
        Self::InvalidParameter {
            name,
            value: value.to_string(),
            reason: err.to_string(),
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidToken => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            Self::Control(err) => StatusCode::from_u16(err.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidToken => None,
            Self::InvalidParameter { name, reason, .. } => {
                Some(json!({ "Parameter": name, "Reason": reason }))
            }
            Self::Control(err) => Some(json!({ "Retriable": err.is_retriable() })),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            code: "ERROR",
            message: self.to_string(),
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}
