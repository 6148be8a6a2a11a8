use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::DbError;
use crate::oracle::OracleError;

/// JSON error body. Never carries a `data` field.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ErrorBody {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            request_id: "unknown".to_string(),
            retryable: false,
            retry_after_seconds: None,
            details: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Box<ErrorBody>,
}

impl ApiError {
    fn with_status(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            body: Box::new(ErrorBody::new(code, message)),
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::FORBIDDEN, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, code, message)
    }

    pub fn too_many_requests(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::with_status(StatusCode::TOO_MANY_REQUESTS, code, message);
        err.body.retryable = true;
        err
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.body.request_id = request_id.into();
        self
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.body.details = Some(details);
        self
    }

    pub fn with_retry_after_seconds(mut self, seconds: u32) -> Self {
        self.body.retry_after_seconds = Some(seconds);
        self.body.retryable = true;
        self
    }

    /// Map a store error. Client errors keep their meaning; anything else is
    /// logged and reported as a generic 500.
    pub fn from_db(err: DbError, request_id: &str, context: &'static str) -> Self {
        let mapped = match err {
            DbError::NotFound(what) => {
                Self::not_found("not_found", format!("{} not found", capitalize(what)))
            }
            DbError::Conflict(conflict) => Self::conflict(conflict.code(), conflict.to_string()),
            other => {
                tracing::error!(error = %other, request_id = %request_id, "{context}");
                Self::internal("internal_error", context)
            }
        };
        mapped.with_request_id(request_id)
    }

    /// Map an oracle failure. Both variants are server-side problems.
    pub fn from_oracle(err: OracleError, request_id: &str) -> Self {
        tracing::error!(error = %err, request_id = %request_id, "Authorization check failed");
        Self::internal("internal_error", "Failed to authorize request").with_request_id(request_id)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.body.retry_after_seconds;
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Conflict;

    #[test]
    fn test_body_shape() {
        let err = ApiError::forbidden("forbidden", "Forbidden: you cannot edit this note")
            .with_request_id("req_1");
        let json = serde_json::to_value(&*err.body).unwrap();
        assert_eq!(json["error"], "Forbidden: you cannot edit this note");
        assert_eq!(json["code"], "forbidden");
        assert_eq!(json["request_id"], "req_1");
        assert!(json.get("data").is_none());
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::too_many_requests("rate_limited", "Too many requests")
            .with_retry_after_seconds(42)
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
    }

    #[test]
    fn test_db_errors_map_to_status() {
        let not_found = ApiError::from_db(DbError::NotFound("trip"), "req", "Failed");
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.body.error, "Trip not found");

        let conflict = ApiError::from_db(DbError::Conflict(Conflict::LastOwner), "req", "Failed");
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        assert_eq!(conflict.body.code, "last_owner");

        let internal = ApiError::from_db(
            DbError::Query(sqlx::Error::PoolTimedOut),
            "req",
            "Failed to load trip",
        );
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.body.error, "Failed to load trip");
    }
}
