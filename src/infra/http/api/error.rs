use crate::application::error::ErrorReport;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error payload: `{status, name, message}`.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub status: u16,
    pub name: String,
    pub message: String,
}

pub mod names {
    pub const BAD_REQUEST: &str = "Bad Request";
    pub const NOT_FOUND: &str = "Not Found";
    pub const CONFLICT: &str = "Conflict";
    pub const RATE_LIMITED: &str = "Too Many Requests";
    pub const UNAVAILABLE: &str = "Service Unavailable";
    pub const INTERNAL: &str = "Internal Server Error";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    name: &'static str,
    message: String,
    /// Server-side detail for the response log; never serialized.
    detail: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        name: &'static str,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            status,
            name,
            message: message.into(),
            detail,
        }
    }

    pub fn bad_request(message: impl Into<String>, detail: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, names::BAD_REQUEST, message, detail)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, names::NOT_FOUND, message, None)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, names::CONFLICT, message, None)
    }

    pub fn unavailable(detail: Option<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            names::UNAVAILABLE,
            "Service Unavailable",
            detail,
        )
    }

    pub fn internal(detail: Option<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            names::INTERNAL,
            "Internal Server Error",
            detail,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn rate_limited(retry_after: u64) -> Response {
        let body = ApiErrorBody {
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            name: names::RATE_LIMITED.to_string(),
            message: "Too many requests, please try again later.".to_string(),
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after={retry_after}"),
        )
        .attach(&mut response);
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let diagnostic = format!(
            "{}: {}",
            self.name,
            self.detail.as_deref().unwrap_or(&self.message)
        );
        let body = ApiErrorBody {
            status: self.status.as_u16(),
            name: self.name.to_string(),
            message: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message("infra::http::api", self.status, diagnostic)
            .attach(&mut response);
        response
    }
}
