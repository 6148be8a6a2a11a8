//! Membership endpoints, mounted under both trips and groups.
//!
//! The resource kind comes from an `Extension` set by the parent router;
//! path parameters are read positionally so one handler serves both.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use withme_id::UserId;
use withme_model::{MembershipStatus, ResourceKind, Role};

use super::data;
use crate::api::authz;
use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::api::validation;
use crate::policy::Action;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_members).post(invite_member))
        .route("/accept", post(accept_invitation))
        .route("/{user_id}", patch(update_member).delete(remove_member))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct InviteMemberRequest {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: String,
}

#[derive(Debug, Serialize)]
struct Removed {
    removed: bool,
    user_id: UserId,
}

fn parse_role(raw: &str, kind: ResourceKind, request_id: &str) -> Result<Role, ApiError> {
    Role::parse_for(raw, kind).map_err(|e| {
        validation::invalid(vec![FieldError::new("role", e.to_string())], request_id)
    })
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_members(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id,)): Path<(String,)>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let resource = validation::parse_resource(kind, &resource_id, &ctx.request_id)?;
    authz::require(&state, &ctx, resource, Action::ListMembers).await?;

    let members = state
        .store()
        .list_memberships(resource)
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id, "Failed to list members"))?;

    Ok(data(members))
}

async fn invite_member(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id,)): Path<(String,)>,
    body: Result<Json<InviteMemberRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let resource = validation::parse_resource(kind, &resource_id, &request_id)?;
    let caller = authz::require(&state, &ctx, resource, Action::ManageMembers).await?;

    let req = validation::body(body, &request_id)?;
    let invitee: UserId = UserId::parse(&req.user_id).map_err(|_| {
        validation::invalid(
            vec![FieldError::new("user_id", "must be a user id")],
            &request_id,
        )
    })?;
    let role = parse_role(&req.role, kind, &request_id)?;
    authz::require_owner_for(&state, &ctx, resource, caller, &[role]).await?;

    let membership = state
        .store()
        .add_membership(resource, invitee, role, MembershipStatus::Invited)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to invite member"))?;

    info!(
        request_id = %request_id,
        resource_id = %resource,
        user_id = %invitee,
        role = %role,
        invited_by = %caller,
        "Member invited"
    );
    Ok((StatusCode::CREATED, data(membership)))
}

async fn accept_invitation(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id,)): Path<(String,)>,
) -> Result<impl IntoResponse, ApiError> {
    let user = ctx.require_user()?;
    let resource = validation::parse_resource(kind, &resource_id, &ctx.request_id)?;

    let membership = state
        .store()
        .accept_invitation(resource, user)
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id, "Failed to accept invitation"))?;

    Ok(data(membership))
}

async fn update_member(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id, user_id)): Path<(String, String)>,
    body: Result<Json<UpdateMemberRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let resource = validation::parse_resource(kind, &resource_id, &request_id)?;
    let target: UserId = validation::parse_id(&user_id, "user", &request_id)?;
    let caller = authz::require(&state, &ctx, resource, Action::ManageMembers).await?;

    let req = validation::body(body, &request_id)?;
    let role = parse_role(&req.role, kind, &request_id)?;

    let current = state
        .store()
        .membership(resource, target)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to load membership"))?
        .ok_or_else(|| {
            ApiError::not_found("membership_not_found", "Membership not found")
                .with_request_id(&request_id)
        })?;
    authz::require_owner_for(&state, &ctx, resource, caller, &[role, current.role]).await?;

    let membership = state
        .store()
        .update_membership_role(resource, target, role)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to update member"))?;

    info!(
        request_id = %request_id,
        resource_id = %resource,
        user_id = %target,
        from = %current.role,
        to = %role,
        "Member role changed"
    );
    Ok(data(membership))
}

async fn remove_member(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: RequestContext,
    Path((resource_id, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let resource = validation::parse_resource(kind, &resource_id, &request_id)?;
    let target: UserId = validation::parse_id(&user_id, "user", &request_id)?;

    // Leaving is always allowed; removing someone else needs the manage policy.
    if target != caller {
        authz::require(&state, &ctx, resource, Action::ManageMembers).await?;
        let current = state
            .store()
            .membership(resource, target)
            .await
            .map_err(|e| ApiError::from_db(e, &request_id, "Failed to load membership"))?;
        if let Some(current) = current {
            authz::require_owner_for(&state, &ctx, resource, caller, &[current.role]).await?;
        }
    }

    state
        .store()
        .remove_membership(resource, target)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to remove member"))?;

    info!(
        request_id = %request_id,
        resource_id = %resource,
        user_id = %target,
        removed_by = %caller,
        "Member removed"
    );
    Ok(data(Removed {
        removed: true,
        user_id: target,
    }))
}
