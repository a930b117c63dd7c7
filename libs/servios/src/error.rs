use crate::transport::TransportError;
use http::StatusCode;
use serde_json::{Value, json};
use servios_http::HttpError;
use std::sync::Arc;
use thiserror::Error;

/// Message used when a request failed without any response or message.
pub const NETWORK_ERROR_MESSAGE: &str = "Network error";

/// The normalized error every caller of a service client observes.
///
/// `payload` is whatever the server answered with (parsed as JSON when
/// possible), or `{"message": ...}` when there was no answer at all.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RequestError {
    pub status: Option<StatusCode>,
    pub payload: Value,
    pub message: String,
}

impl RequestError {
    #[must_use]
    pub fn new(status: Option<StatusCode>, payload: Value, message: impl Into<String>) -> Self {
        Self {
            status,
            payload,
            message: message.into(),
        }
    }

    /// An error that never reached a server response.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: None,
            payload: json!({ "message": message }),
            message,
        }
    }

    /// A request that could not be built (bad header, unencodable query...).
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        let message = format!("Invalid request: {}", reason.into());
        Self {
            status: None,
            payload: json!({ "message": message }),
            message,
        }
    }

    /// A 2xx response whose body did not match the expected type.
    #[must_use]
    pub fn decode(status: StatusCode, err: &serde_json::Error) -> Self {
        let message = format!("Failed to decode response body: {err}");
        Self {
            status: Some(status),
            payload: json!({ "message": message }),
            message,
        }
    }

    #[must_use]
    pub fn is_status(&self, code: StatusCode) -> bool {
        self.status == Some(code)
    }
}

/// Converts a raw transport failure into the caller-visible [`RequestError`].
pub type ErrorTransform = Arc<dyn Fn(&TransportError) -> RequestError + Send + Sync>;

/// Default transport error normalization.
///
/// - a non-empty response body becomes the payload (JSON when it parses,
///   otherwise a JSON string);
/// - with no body the payload is `{"message": <transport message>}`, falling
///   back to [`NETWORK_ERROR_MESSAGE`];
/// - `message` is `payload.message` when that is a string, else the transport
///   message.
#[must_use]
pub fn default_error_transform(err: &TransportError) -> RequestError {
    let fallback = if err.message.is_empty() {
        NETWORK_ERROR_MESSAGE
    } else {
        err.message.as_str()
    };

    let payload = match err.body.as_deref() {
        Some(body) if !body.is_empty() => serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())),
        _ => json!({ "message": fallback }),
    };

    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_owned();

    RequestError {
        status: err.status,
        payload,
        message,
    }
}

/// Construction-time configuration failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("base_url is required")]
    MissingBaseUrl,

    #[error("invalid base_url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid default header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid retry status code {0}")]
    InvalidStatus(u16),

    #[error("resource path is required")]
    MissingResourcePath,

    #[error("failed to load configuration: {0}")]
    Load(#[source] Box<figment::Error>),

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] HttpError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
