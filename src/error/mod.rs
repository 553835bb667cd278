//! Error handling for the probe engine and its outer surfaces
//!
//! Two families of errors exist and they never mix:
//! - [`AppError`] covers configuration problems and everything that aborts a
//!   run before any probe is sent (including Kerberos ticket acquisition).
//! - [`ProbeError`] covers a single (mechanism, URL) attempt. It is logged and
//!   folded into a `status = 0` health response, never propagated.

pub mod probe;
pub mod types;

pub use probe::ProbeError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Error body returned by the `/healthz` listener, RFC 7807 shaped
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: String,
    pub request_id: Option<String>,
}

/// Run-level application error
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    #[error("Unsupported auth type: {name} (expected one of: none, ntlm, kerberos)")]
    UnsupportedAuthType { name: String },

    #[error("Kerberos ticket acquisition failed for {principal}: {message}")]
    TicketAcquisition { principal: String, message: String },

    // System errors
    #[error("IO operation failed: {operation} - {message}")]
    Io { operation: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a new configuration validation error
    pub fn config_validation(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for errors that must abort a run before any probing starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigValidation { .. }
                | Self::ConfigParse { .. }
                | Self::UnsupportedAuthType { .. }
                | Self::TicketAcquisition { .. }
        )
    }

    /// HTTP status used by the `/healthz` listener. Configuration failures
    /// answer 400, the same as a negative verdict.
    pub fn status_code(&self) -> StatusCode {
        if self.is_configuration() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. }
            | Self::ConfigParse { .. }
            | Self::UnsupportedAuthType { .. } => "about:blank#configuration",
            Self::TicketAcquisition { .. } => "about:blank#kerberos",
            _ => "about:blank#internal",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. }
            | Self::ConfigParse { .. }
            | Self::UnsupportedAuthType { .. } => "Configuration Error",
            Self::TicketAcquisition { .. } => "Kerberos Error",
            _ => "Internal Error",
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self, request_id: Option<&str>) {
        let request_id = request_id.unwrap_or("unknown");

        if self.is_configuration() {
            warn!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Probe run aborted"
            );
        } else {
            error!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Application error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        self.log(Some(&request_id));

        let status = self.status_code();
        let body = ErrorResponse {
            error_type: self.error_type().to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
            instance: format!("/errors/{}", request_id),
            request_id: Some(request_id),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for the application
pub type Result<T, E = AppError> = std::result::Result<T, E>;
