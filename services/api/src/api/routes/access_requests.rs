//! Access request workflow: `pending -> approved | denied`.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;
use withme_id::AccessRequestId;
use withme_model::{AccessRequest, AccessRequestStatus, Membership, ResourceId, ResourceKind, Role};

use super::data;
use crate::api::error::{ApiError, FieldError};
use crate::api::authz;
use crate::api::request_context::RequestContext;
use crate::api::validation;
use crate::policy::Action;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_requests).post(create_request))
        .route("/{request_id}/approve", post(approve_request))
        .route("/{request_id}/deny", post(deny_request))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateAccessRequest {
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    /// Defaults to `viewer`.
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct DenyRequest {
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApprovalResponse {
    role: Role,
    request: AccessRequest,
    membership: Membership,
}

/// 404 unless the trip or group exists.
async fn ensure_exists(
    state: &AppState,
    resource: ResourceId,
    request_id: &str,
) -> Result<(), ApiError> {
    let found = match resource {
        ResourceId::Trip(id) => state.store().trip(id).await.map(|t| t.is_some()),
        ResourceId::Group(id) => state.store().group(id).await.map(|g| g.is_some()),
    }
    .map_err(|e| ApiError::from_db(e, request_id, "Failed to load resource"))?;

    if !found {
        let kind = resource.kind();
        return Err(ApiError::not_found(
            format!("{kind}_not_found"),
            format!("{} not found", if kind == ResourceKind::Trip { "Trip" } else { "Group" }),
        )
        .with_request_id(request_id));
    }
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_request(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id,)): Path<(String,)>,
    body: Result<Json<CreateAccessRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let requester = ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let resource = validation::parse_resource(kind, &resource_id, &request_id)?;

    let req = validation::optional_body(body, &request_id)?;
    validation::validate(&req, &request_id)?;
    ensure_exists(&state, resource, &request_id).await?;

    let access_request = state
        .store()
        .create_access_request(resource, requester, req.message)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to create access request"))?;

    info!(
        request_id = %request_id,
        resource_id = %resource,
        user_id = %requester,
        access_request_id = %access_request.id,
        "Access requested"
    );
    Ok((StatusCode::CREATED, data(access_request)))
}

async fn list_requests(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id,)): Path<(String,)>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = &ctx.request_id;
    let resource = validation::parse_resource(kind, &resource_id, request_id)?;
    authz::require(&state, &ctx, resource, Action::ReviewAccessRequests).await?;

    let status = query
        .status
        .as_deref()
        .map(str::parse::<AccessRequestStatus>)
        .transpose()
        .map_err(|_| {
            validation::invalid(
                vec![FieldError::new(
                    "status",
                    "must be one of pending, approved, denied",
                )],
                request_id,
            )
        })?;

    let requests = state
        .store()
        .list_access_requests(resource, status)
        .await
        .map_err(|e| ApiError::from_db(e, request_id, "Failed to list access requests"))?;

    Ok(data(requests))
}

async fn approve_request(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id, access_request_id)): Path<(String, String)>,
    body: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let resource = validation::parse_resource(kind, &resource_id, &request_id)?;
    let id: AccessRequestId =
        validation::parse_id(&access_request_id, "access_request", &request_id)?;
    let approver = authz::require(&state, &ctx, resource, Action::ReviewAccessRequests).await?;

    let req = validation::optional_body(body, &request_id)?;
    let role = match req.role.as_deref() {
        Some(raw) => Role::parse_for(raw, kind).map_err(|e| {
            validation::invalid(vec![FieldError::new("role", e.to_string())], &request_id)
        })?,
        None => Role::Viewer,
    };
    authz::require_owner_for(&state, &ctx, resource, approver, &[role]).await?;

    let approval = state
        .store()
        .approve_access_request(resource, id, role, approver)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to approve access request"))?;

    info!(
        request_id = %request_id,
        resource_id = %resource,
        access_request_id = %id,
        user_id = %approval.request.requester,
        role = %approval.membership.role,
        approved_by = %approver,
        "Access request approved"
    );

    Ok(data(ApprovalResponse {
        role: approval.membership.role,
        request: approval.request,
        membership: approval.membership,
    }))
}

async fn deny_request(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id, access_request_id)): Path<(String, String)>,
    body: Result<Json<DenyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let resource = validation::parse_resource(kind, &resource_id, &request_id)?;
    let id: AccessRequestId =
        validation::parse_id(&access_request_id, "access_request", &request_id)?;
    let approver = authz::require(&state, &ctx, resource, Action::ReviewAccessRequests).await?;

    let req = validation::optional_body(body, &request_id)?;
    validation::validate(&req, &request_id)?;

    let denied = state
        .store()
        .deny_access_request(resource, id, req.reason, approver)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to deny access request"))?;

    info!(
        request_id = %request_id,
        resource_id = %resource,
        access_request_id = %id,
        denied_by = %approver,
        "Access request denied"
    );
    Ok(data(denied))
}
