//! API error types and response handling.
//!
//! Engine operations report failure through their `success` flag, so only two things
//! become HTTP errors: malformed client input and an adapter that could not be opened
//! at startup.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use blueprox_core::BlueproxError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Structured context, e.g. the accepted range.
        details: Option<serde_json::Value>,
    },

    /// 503 Service Unavailable - The Bluetooth adapter is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Any other core failure.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ApiError {
    /// Shorthand for a 400 with the given code.
    pub fn bad_request(error_code: &str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            error_code: error_code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details. No-op for variants without a details slot.
    #[must_use]
    pub fn with_details(mut self, value: serde_json::Value) -> Self {
        if let Self::BadRequest { details, .. } = &mut self {
            *details = Some(value);
        }
        self
    }

    /// HTTP status this error is answered with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_scan_duration",
    "message": "Scan duration must be between 1 and 60 seconds, got 90",
    "details": { "min": 1, "max": 60 }
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "invalid_bluetooth_address").
    #[schema(example = "invalid_bluetooth_address")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Invalid Bluetooth address: 'AA-BB'. Expected format XX:XX:XX:XX:XX:XX.")]
    pub message: String,

    /// Optional structured context.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details,
            },
            Self::ServiceUnavailable {
                error_code,
                message,
            } => {
                tracing::warn!(error_code = %error_code, "Request refused, adapter unavailable");
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                }
            }
            Self::InternalError {
                error_code,
                message,
            } => {
                tracing::error!(error_code = %error_code, message = %message, "Internal server error");
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                }
            }
        };

        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Classify a core error by its HTTP status code.
impl From<&BlueproxError> for ApiError {
    fn from(err: &BlueproxError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();

        match err.http_status_code() {
            400 => Self::BadRequest {
                error_code,
                message,
                details: None,
            },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
            },
            _ => Self::InternalError {
                error_code,
                message,
            },
        }
    }
}

impl From<BlueproxError> for ApiError {
    fn from(err: BlueproxError) -> Self {
        Self::from(&err)
    }
}

impl From<blueprox_core::BluetoothError> for ApiError {
    fn from(err: blueprox_core::BluetoothError) -> Self {
        Self::from(BlueproxError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprox_core::BluetoothError;
    use serde_json::json;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::bad_request("test_error", "Test message");
        assert!(err.to_string().contains("Bad Request"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_details_only_attach_to_bad_request() {
        let err = ApiError::bad_request("invalid_scan_duration", "too long")
            .with_details(json!({ "min": 1, "max": 60 }));
        assert!(matches!(err, ApiError::BadRequest { details: Some(_), .. }));

        let err = ApiError::from(BlueproxError::BluetoothAdapterNotFound)
            .with_details(json!({ "ignored": true }));
        assert!(matches!(err, ApiError::ServiceUnavailable { .. }));
    }

    #[test]
    fn test_invalid_address_maps_to_bad_request() {
        let err = ApiError::from(BluetoothError::InvalidAddress {
            address: "nope".into(),
        });
        match err {
            ApiError::BadRequest { error_code, .. } => {
                assert_eq!(error_code, "invalid_bluetooth_address");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_adapter_errors_map_to_unavailable() {
        let startup = BlueproxError::BluetoothAdapterPoweredOff;
        let err = ApiError::from(&startup);
        assert!(matches!(
            err,
            ApiError::ServiceUnavailable { ref error_code, .. }
                if error_code == "bluetooth_adapter_powered_off"
        ));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_other_errors_map_to_internal() {
        let err = ApiError::from(BlueproxError::ConfigParseError("bad toml".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
