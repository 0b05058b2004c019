//! Errors that carry an HTTP meaning.
//!
//! Handlers return `anyhow::Error`; the router downcasts to [`ApiError`] and
//! renders the matching status and body. Anything else becomes a plain 500.

use anyhow::Error;
use http::{Response, StatusCode};
use serde_json::{Value, json};

use crate::{Outgoing, http_util::response};

pub const INTERNAL_MESSAGE: &str = "Internal error occurred!";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed chat completion request, rendered in the OpenAI error shape.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("request entity too large")]
    PayloadTooLarge,

    /// Non-success answer from a third-party API, relayed with its status.
    #[error("{message}")]
    Upstream { status: StatusCode, message: String },

    /// Generation failed; details stay in the log.
    #[error("Internal error occurred!")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream { status, .. } => *status,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            Self::InvalidRequest(message) => json!({
                "error": {
                    "message": message,
                    "type": "invalid_request_error",
                    "param": null,
                    "code": null,
                }
            }),
            Self::Internal => internal_error_body(),
            other => json!({ "error": other.to_string() }),
        }
    }

    pub fn into_response(self) -> Result<Response<Outgoing>, Error> {
        response::json(self.status(), &self.body())
    }
}

/// Body of a failed generation, also used as the in-band error frame of a stream.
pub fn internal_error_body() -> Value {
    json!({
        "error": {
            "message": INTERNAL_MESSAGE,
            "type": "internal_error",
            "code": null,
        }
    })
}
