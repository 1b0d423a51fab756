//! # Error Handling
//!
//! HTTP-facing error type for the control surface and its conversion to JSON
//! error responses.
//!
//! ## Layers:
//! - **Audio / transport / session**: `thiserror` enums (`CaptureError`,
//!   `TransportError`, `SessionError`, ...) close to where they happen
//! - **Startup**: `anyhow::Result` in `main.rs` and `config.rs`
//! - **HTTP**: `AppError` below; every handler returns `AppResult<T>` and actix
//!   renders the error through `ResponseError`
//!
//! ## Response Body:
//! ```json
//! {"error": {"type": "conflict", "message": "...", "timestamp": "2024-..."}}
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::audio::CaptureError;
use crate::session::SessionError;
use crate::transport::TransportError;

/// Error categories and the status codes they map to.
#[derive(Debug)]
pub enum AppError {
    /// 500
    Internal(String),

    /// 400: malformed request body
    BadRequest(String),

    /// 409: request does not fit the current session state
    Conflict(String),

    /// 503: microphone, speakers or backend not reachable
    Unavailable(String),

    /// 500
    ConfigError(String),

    /// 400: well-formed request with unacceptable values
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<actix::MailboxError> for AppError {
    fn from(err: actix::MailboxError) -> Self {
        AppError::Internal(format!("Session actor unreachable: {}", err))
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotConnected => AppError::Conflict(err.to_string()),
            SessionError::Transport(TransportError::InvalidUrl(url)) => {
                AppError::ValidationError(format!("Invalid endpoint URL: {}", url))
            }
            SessionError::Transport(TransportError::NotOpen) => AppError::Conflict(err.to_string()),
            SessionError::Transport(TransportError::Connect(msg)) => AppError::Unavailable(msg),
            SessionError::Transport(TransportError::Congested) => AppError::Unavailable(err.to_string()),
            SessionError::Capture(CaptureError::PermissionDenied(msg))
            | SessionError::Capture(CaptureError::DeviceUnavailable(msg))
            | SessionError::Capture(CaptureError::Stream(msg)) => AppError::Unavailable(msg),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn test_error_body_shape() {
        let response = AppError::Conflict("no session".into()).error_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "conflict");
        assert_eq!(value["error"]["message"], "no session");
        assert!(value["error"]["timestamp"].is_string());
    }

    #[test]
    fn test_session_error_mapping() {
        let not_connected: AppError = SessionError::NotConnected.into();
        assert_eq!(not_connected.status_code(), StatusCode::CONFLICT);

        let bad_url: AppError = SessionError::Transport(TransportError::InvalidUrl("ftp://x".into())).into();
        assert_eq!(bad_url.status_code(), StatusCode::BAD_REQUEST);

        let denied: AppError = SessionError::Capture(CaptureError::PermissionDenied("no".into())).into();
        assert_eq!(denied.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let no_runtime: AppError = SessionError::Transport(TransportError::Connect("no reactor".into())).into();
        assert_eq!(no_runtime.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
