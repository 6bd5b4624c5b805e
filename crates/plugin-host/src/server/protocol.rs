//! HTTP Protocol
//!
//! Response payloads and the caller-facing error taxonomy. Every failure is a
//! 400 with a JSON `{"error": "..."}` body; there is no separate not-found
//! status.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

use crate::plugin::{MissingField, RegistryError};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Serialize `body` with the JSON content type used for every response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_string(body) {
        Ok(text) => (status, [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], text).into_response(),
        Err(e) => {
            tracing::error!("Failed to serialize response: {}", e);
            DispatchError::PluginFailed.into_response()
        }
    }
}

/// Parse a request body. An empty body is treated as `{}`.
pub fn parse_body(bytes: &[u8]) -> Result<Value, DispatchError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(bytes).map_err(|e| DispatchError::InvalidJson(e.to_string()))
}

/// `{"status": ...}` success payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub const HEALTHY: Self = Self { status: "Healthy" };
    pub const PLUGIN_INFO_UPLOADED: Self = Self {
        status: "Uploaded plugin info",
    };
    pub const ENVIRONMENT_UPLOADED: Self = Self {
        status: "Uploaded environment variables",
    };
}

impl IntoResponse for StatusResponse {
    fn into_response(self) -> Response {
        json_response(StatusCode::OK, &self)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Caller-facing failures. Causes of import and plugin failures are logged,
/// never returned.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    #[error(transparent)]
    Upload(#[from] RegistryError),

    #[error("Error applying environment variables: {0}")]
    Environment(String),

    #[error("No plugin found for path")]
    NoPlugin,

    #[error("Unsupported event type")]
    UnsupportedEventType,

    #[error(transparent)]
    MissingField(#[from] MissingField),

    #[error("Couldn't import function file")]
    ImportFailed,

    #[error("Error applying global overrides: {0}")]
    GlobalOverrides(String),

    #[error("Error running plugin")]
    PluginFailed,

    #[error("Unable to import module")]
    ModuleUnavailable,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        match serde_json::to_string(&body) {
            Ok(text) => (
                StatusCode::BAD_REQUEST,
                [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
                text,
            )
                .into_response(),
            Err(_) => StatusCode::BAD_REQUEST.into_response(),
        }
    }
}
