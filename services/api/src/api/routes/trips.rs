//! Trip API endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use axum_extra::extract::CookieJar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;
use withme_id::TripId;
use withme_model::{ResourceKind, Trip};

use super::{access_requests, data, guest, members, notes, Deleted};
use crate::api::authz;
use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::api::validation;
use crate::db::{Creator, NewTrip, TripPatch};
use crate::policy::Action;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_trips).post(create_trip))
        .route(
            "/{trip_id}",
            get(get_trip).patch(update_trip).delete(delete_trip),
        )
        .nest(
            "/{trip_id}/members",
            members::routes().layer(Extension(ResourceKind::Trip)),
        )
        .nest(
            "/{trip_id}/access-requests",
            access_requests::routes().layer(Extension(ResourceKind::Trip)),
        )
        .nest("/{trip_id}/notes", notes::routes())
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTripRequest {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub name: String,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 200, message = "must be at most 200 characters"))]
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTripRequest {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 200, message = "must be at most 200 characters"))]
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_public: Option<bool>,
}

/// Trip creation answers `{"trip": ...}` rather than the `data` envelope.
#[derive(Debug, Serialize)]
struct CreatedTrip {
    trip: Trip,
}

fn check_dates(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    request_id: &str,
) -> Result<(), ApiError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(validation::invalid(
                vec![FieldError::new("end_date", "must not be before start_date")],
                request_id,
            ));
        }
    }
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_trip(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: CookieJar,
    body: Result<Json<CreateTripRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();

    let req = validation::body(body, &request_id)?;
    validation::validate(&req, &request_id)?;
    check_dates(req.start_date, req.end_date, &request_id)?;

    // Anonymous creation is allowed, but rate limited per client IP.
    // Rejected bodies never count against the limit.
    let (creator, guest_token) = match ctx.user {
        Some(user) => (Creator::User(user), None),
        None => {
            let token = guest::admit_guest_creation(&state, &ctx).await?;
            (Creator::Guest(token.hash()), Some(token))
        }
    };

    let trip = state
        .store()
        .create_trip(
            NewTrip {
                name: req.name,
                description: req.description,
                destination: req.destination,
                start_date: req.start_date,
                end_date: req.end_date,
                is_public: req.is_public,
            },
            creator,
        )
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to create trip"))?;

    info!(
        request_id = %request_id,
        trip_id = %trip.id,
        guest = guest_token.is_some(),
        "Trip created"
    );

    let body = Json(CreatedTrip { trip });
    Ok(match guest_token {
        Some(token) => {
            let jar = jar.add(token.cookie(state.settings().cookie_secure));
            (StatusCode::CREATED, jar, body).into_response()
        }
        None => (StatusCode::CREATED, body).into_response(),
    })
}

async fn list_trips(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let user = ctx.require_user()?;

    let trips = state
        .store()
        .list_trips_for(user)
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id, "Failed to list trips"))?;

    Ok(data(trips))
}

async fn get_trip(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = ctx.require_user()?;
    let request_id = &ctx.request_id;
    let trip_id: TripId = validation::parse_id(&trip_id, "trip", request_id)?;

    let trip = state
        .store()
        .trip(trip_id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id, "Failed to load trip"))?
        .ok_or_else(|| {
            ApiError::not_found("trip_not_found", "Trip not found").with_request_id(request_id)
        })?;

    if !trip.is_public
        && !authz::allows(&state, &ctx, trip_id.into(), user, Action::ViewResource).await?
    {
        return Err(authz::forbidden(Action::ViewResource, request_id));
    }

    Ok(data(trip))
}

async fn update_trip(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(trip_id): Path<String>,
    body: Result<Json<UpdateTripRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let trip_id: TripId = validation::parse_id(&trip_id, "trip", &request_id)?;
    authz::require(&state, &ctx, trip_id.into(), Action::UpdateResource).await?;

    let req = validation::body(body, &request_id)?;
    validation::validate(&req, &request_id)?;

    let current = state
        .store()
        .trip(trip_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to load trip"))?
        .ok_or_else(|| {
            ApiError::not_found("trip_not_found", "Trip not found").with_request_id(&request_id)
        })?;
    check_dates(
        req.start_date.or(current.start_date),
        req.end_date.or(current.end_date),
        &request_id,
    )?;

    let trip = state
        .store()
        .update_trip(
            trip_id,
            TripPatch {
                name: req.name,
                description: req.description,
                destination: req.destination,
                start_date: req.start_date,
                end_date: req.end_date,
                is_public: req.is_public,
            },
        )
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to update trip"))?;

    Ok(data(trip))
}

async fn delete_trip(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = &ctx.request_id;
    let trip_id: TripId = validation::parse_id(&trip_id, "trip", request_id)?;
    let user = authz::require(&state, &ctx, trip_id.into(), Action::DeleteResource).await?;

    state
        .store()
        .delete_trip(trip_id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id, "Failed to delete trip"))?;

    info!(request_id = %request_id, trip_id = %trip_id, user_id = %user, "Trip deleted");
    Ok(data(Deleted { deleted: true }))
}
