// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::services::tenant_error::{ResolutionError, TenantError};

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 404 Not Found
    NotFound(String),

    // 400 / 401 while working out which tenant a request belongs to
    TenantIdentification { status: u16, message: String },

    // 404 / 500 / 502 while fetching or decrypting tenant credentials
    TenantResolutionFailed {
        status: u16,
        message: String,
        kind: &'static str,
    },

    // 503 tenant database did not answer the probe
    TenantUnreachable(String),

    // 500 Internal Server Error
    InternalServerError {
        message: String,
        correlation_id: Option<Uuid>,
    },

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::NotFound(_) => 404,
            ApiError::TenantIdentification { status, .. } => *status,
            ApiError::TenantResolutionFailed { status, .. } => *status,
            ApiError::TenantUnreachable(_) => 503,
            ApiError::InternalServerError { .. } => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::TenantIdentification { message, .. } => message,
            ApiError::TenantResolutionFailed { message, .. } => message,
            ApiError::TenantUnreachable(msg) => msg,
            ApiError::InternalServerError { message, .. } => message,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::TenantIdentification { status: 401, .. } => "UNAUTHORIZED",
            ApiError::TenantIdentification { .. } => "BAD_REQUEST",
            ApiError::TenantResolutionFailed { .. } => "TENANT_RESOLUTION_FAILED",
            ApiError::TenantUnreachable(_) => "TENANT_UNREACHABLE",
            ApiError::InternalServerError { .. } => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Request stage the error was raised in, when it is tenant related
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            ApiError::TenantIdentification { .. } => Some("identify"),
            ApiError::TenantResolutionFailed { .. } | ApiError::TenantUnreachable(_) => Some("db_connect"),
            ApiError::InternalServerError { .. } => Some("unknown"),
            _ => None,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        });

        if let Some(stage) = self.stage() {
            response["stage"] = json!(stage);
        }

        match self {
            ApiError::TenantResolutionFailed { kind, .. } => {
                response["kind"] = json!(kind);
            }
            ApiError::TenantUnreachable(_) => {
                response["kind"] = json!("tenant_unreachable");
            }
            ApiError::InternalServerError {
                correlation_id: Some(id),
                ..
            } => {
                response["correlation_id"] = json!(id.to_string());
            }
            _ => {}
        }

        response
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }

    /// Log the real cause under a fresh correlation id and return a generic error
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        let correlation_id = Uuid::new_v4();
        tracing::error!(%correlation_id, "Unexpected error: {}", cause);
        ApiError::InternalServerError {
            message: "An unexpected error occurred".to_string(),
            correlation_id: Some(correlation_id),
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::InvalidArgument(message) => ApiError::TenantIdentification { status: 400, message },
            TenantError::AuthenticationFailed(message) => ApiError::TenantIdentification { status: 401, message },
            TenantError::ResolutionFailed(cause) => {
                let kind = cause.kind();
                match cause {
                    ResolutionError::Directory(e) => {
                        tracing::warn!("Tenant directory lookup failed: {}", e);
                        let (status, message) = match e.upstream_status() {
                            Some(404) => (404, "Tenant not found in accounts directory".to_string()),
                            Some(code) => (502, format!("Accounts directory responded {}", code)),
                            None => (502, "Tenant DB connection failed: accounts directory unavailable".to_string()),
                        };
                        ApiError::TenantResolutionFailed { status, message, kind }
                    }
                    ResolutionError::Credential(e) => {
                        tracing::error!("Tenant credential error: {}", e);
                        ApiError::TenantResolutionFailed {
                            status: 500,
                            message: "Tenant DB credentials could not be decrypted".to_string(),
                            kind,
                        }
                    }
                    ResolutionError::Unreachable(e) => {
                        tracing::error!("Tenant DB unreachable: {}", e);
                        ApiError::TenantUnreachable("Tenant DB connection failed".to_string())
                    }
                }
            }
            other @ (TenantError::Registry(_) | TenantError::NoActiveTenant) => ApiError::internal(other),
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
