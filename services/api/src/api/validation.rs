//! Body and path parsing shared by the handlers.
//!
//! Bodies are taken as `Result<Json<T>, JsonRejection>` so that a malformed
//! body is reported after authorization, in our error shape.

use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use validator::{Validate, ValidationErrors};
use withme_id::{GroupId, TripId};
use withme_model::{ResourceId, ResourceKind};

use crate::api::error::{ApiError, FieldError};

/// Unwrap a JSON body or answer 400.
pub fn body<T>(body: Result<Json<T>, JsonRejection>, request_id: &str) -> Result<T, ApiError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        ApiError::bad_request("invalid_body", rejection.body_text()).with_request_id(request_id)
    })
}

/// Like [`body`], but a request without a JSON body yields `T::default()`.
pub fn optional_body<T: Default>(
    body: Result<Json<T>, JsonRejection>,
    request_id: &str,
) -> Result<T, ApiError> {
    match body {
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        other => self::body(other, request_id),
    }
}

fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut details: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = field.to_string();
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("is invalid ({})", e.code));
                FieldError::new(field.clone(), message)
            })
        })
        .collect();
    details.sort_by(|a, b| a.field.cmp(&b.field));
    details
}

/// Run derive-based validation, collecting every field error.
pub fn validate<T: Validate>(value: &T, request_id: &str) -> Result<(), ApiError> {
    value.validate().map_err(|errors| invalid(field_errors(&errors), request_id))
}

/// 400 with field details.
pub fn invalid(details: Vec<FieldError>, request_id: &str) -> ApiError {
    ApiError::bad_request("validation_failed", "Request validation failed")
        .with_details(details)
        .with_request_id(request_id)
}

/// Parse a path segment or answer 400 `invalid_{what}_id`.
pub fn parse_id<T: FromStr>(raw: &str, what: &str, request_id: &str) -> Result<T, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request(
            format!("invalid_{what}_id"),
            format!("Invalid {what} ID format"),
        )
        .with_request_id(request_id)
    })
}

/// Parse a trip or group id of the given kind.
pub fn parse_resource(
    kind: ResourceKind,
    raw: &str,
    request_id: &str,
) -> Result<ResourceId, ApiError> {
    match kind {
        ResourceKind::Trip => parse_id::<TripId>(raw, "trip", request_id).map(ResourceId::from),
        ResourceKind::Group => parse_id::<GroupId>(raw, "group", request_id).map(ResourceId::from),
    }
}
