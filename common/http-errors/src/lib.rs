use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Expected failures carry a stable machine-readable `code`; internal
/// failures collapse to `internal_error` without leaking storage details.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized { code: &'static str },
    ForbiddenMissingRole { role: &'static str },
    Forbidden,
    BadRequest { code: &'static str, message: Option<String> },
    NotFound { code: &'static str },
    Conflict { code: &'static str, message: Option<String> },
    Internal { message: Option<String> },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal {
            message: Some(e.to_string()),
        }
    }

    pub fn bad_request(code: &'static str) -> Self {
        Self::BadRequest {
            code,
            message: None,
        }
    }

    pub fn not_authenticated() -> Self {
        Self::Unauthorized {
            code: "not_authenticated",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, error_code) = match self {
            ApiError::Unauthorized { code } => (
                StatusCode::UNAUTHORIZED,
                ErrorBody { code: code.into(), missing_role: None, message: None },
                code,
            ),
            ApiError::ForbiddenMissingRole { role } => (
                StatusCode::FORBIDDEN,
                ErrorBody { code: "missing_role".into(), missing_role: Some(role.into()), message: None },
                "missing_role",
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                ErrorBody { code: "forbidden".into(), missing_role: None, message: None },
                "forbidden",
            ),
            ApiError::BadRequest { code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorBody { code: code.into(), missing_role: None, message },
                code,
            ),
            ApiError::NotFound { code } => (
                StatusCode::NOT_FOUND,
                ErrorBody { code: code.into(), missing_role: None, message: None },
                code,
            ),
            ApiError::Conflict { code, message } => (
                StatusCode::CONFLICT,
                ErrorBody { code: code.into(), missing_role: None, message },
                code,
            ),
            ApiError::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody { code: "internal_error".into(), missing_role: None, message },
                "internal_error",
            ),
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
