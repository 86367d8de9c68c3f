use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::services::m3u_parser::ParseError;
use crate::services::metrics;
use crate::services::xtream::XtreamError;

/// Request-scoped failures surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed playlist: {0}")]
    Format(#[from] ParseError),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("missing username or password")]
    MissingCredentials,

    #[error("invalid credentials")]
    Unauthorized,

    #[error("missing parameter {0}")]
    MissingParameter(&'static str),

    #[error("invalid parameter {0}")]
    InvalidParameter(&'static str),

    #[error("unsupported action \"{0}\"")]
    UnsupportedAction(String),

    #[error("no redirect recorded for {0}")]
    RedirectNotFound(String),

    #[error("cannot resolve redirect: {0}")]
    RedirectResolution(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<XtreamError> for ProxyError {
    fn from(err: XtreamError) -> Self {
        ProxyError::Upstream(err.to_string())
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest errors carry the full URL, credentials included
        ProxyError::Upstream(err.without_url().to_string())
    }
}

impl From<anyhow::Error> for ProxyError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ParseError>() {
            Ok(parse) => ProxyError::Format(parse),
            Err(other) => ProxyError::Internal(format!("{:#}", other)),
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingCredentials
            | ProxyError::MissingParameter(_)
            | ProxyError::InvalidParameter(_)
            | ProxyError::UnsupportedAction(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::RedirectNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Format(_)
            | ProxyError::Upstream(_)
            | ProxyError::RedirectResolution(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ProxyError::Unauthorized => {
                metrics::AUTH_FAILURES.with_label_values(&["mismatch"]).inc();
                status.into_response()
            }
            ProxyError::MissingCredentials => {
                metrics::AUTH_FAILURES.with_label_values(&["missing"]).inc();
                (status, Json(json!({ "error": self.to_string() }))).into_response()
            }
            ProxyError::MissingParameter(_)
            | ProxyError::InvalidParameter(_)
            | ProxyError::UnsupportedAction(_) => {
                (status, Json(json!({ "error": self.to_string() }))).into_response()
            }
            ProxyError::RedirectNotFound(_) => {
                tracing::warn!(error = %self, "HLS chunk without redirect");
                (status, Json(json!({ "error": "not found" }))).into_response()
            }
            _ => {
                // Causes stay server-side
                tracing::error!(error = %self, "request failed");
                (status, Json(json!({ "error": "upstream request failed" }))).into_response()
            }
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::MissingCredentials.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ProxyError::MissingParameter("vod_id").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::RedirectNotFound("42".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::RedirectResolution("bad location".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::Upstream("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_parameter_names_field() {
        let err = ProxyError::MissingParameter("series_id");
        assert!(err.to_string().contains("series_id"));
    }

    #[test]
    fn test_unauthorized_has_empty_body() {
        let resp = ProxyError::Unauthorized.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().get("content-type").is_none());
    }
}
