// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use streamflow_proxy::{ProxyError, ProxyErrorKind};

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub kind: Option<ProxyErrorKind>,
    pub upstream_status: Option<u16>,
    pub domain: Option<String>,
    pub original_url: Option<String>,
    pub redirect_url: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind: None,
            upstream_status: None,
            domain: None,
            original_url: None,
            redirect_url: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ProxyErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_url: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            success: false,
            message: self.message,
            error: self.kind,
            status_code: self.upstream_status,
            domain: self.domain,
            original_url: self.original_url,
            redirect_url: self.redirect_url,
        });

        (status, body).into_response()
    }
}

/// Convert relay and resolver failures to HTTP errors
impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        if err.kind == ProxyErrorKind::Internal {
            tracing::error!("Relay internal error: {}", err.message);
        }

        Self {
            status: err.status,
            message: err.message,
            kind: Some(err.kind),
            upstream_status: err.upstream_status,
            domain: err.domain,
            original_url: err.original_url,
            redirect_url: err.redirect_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_error_fields_carry_over() {
        let err: AppError = ProxyError::redirect_to_unreachable(
            "http://a.example/1.ts",
            "http://dead.example/1.ts",
            "dead.example",
        )
        .into();

        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind, Some(ProxyErrorKind::RedirectToUnreachableDomain));
        assert_eq!(err.domain.as_deref(), Some("dead.example"));
        assert_eq!(err.redirect_url.as_deref(), Some("http://dead.example/1.ts"));
    }

    #[test]
    fn test_error_body_omits_empty_fields() {
        let body = ErrorResponse {
            success: false,
            message: "Stream URL is required".to_string(),
            error: Some(ProxyErrorKind::InvalidRequest),
            status_code: None,
            domain: None,
            original_url: None,
            redirect_url: None,
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "INVALID_REQUEST");
        assert!(json.get("statusCode").is_none());
        assert!(json.get("domain").is_none());
    }
}
