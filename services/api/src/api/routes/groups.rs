//! Group API endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;
use withme_id::GroupId;
use withme_model::{Group, GroupVisibility, Membership, MembershipStatus, ResourceKind};

use super::{access_requests, data, guest, members, Deleted};
use crate::api::authz;
use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::api::validation;
use crate::db::{Creator, DbError, GroupPatch, NewGroup};
use crate::policy::Action;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .route(
            "/{group_id}",
            get(get_group).patch(update_group).delete(delete_group),
        )
        .route("/{group_id}/join", post(join_group))
        .nest(
            "/{group_id}/members",
            members::routes().layer(Extension(ResourceKind::Group)),
        )
        .nest(
            "/{group_id}/access-requests",
            access_requests::routes().layer(Extension(ResourceKind::Group)),
        )
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub name: String,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 16, message = "must be at most 16 characters"))]
    pub emoji: Option<String>,
    pub visibility: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateGroupRequest {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 16, message = "must be at most 16 characters"))]
    pub emoji: Option<String>,
    pub visibility: Option<String>,
}

/// Group creation answers `{"group": ...}` rather than the `data` envelope.
#[derive(Debug, Serialize)]
struct CreatedGroup {
    group: Group,
}

fn parse_visibility(
    raw: Option<&str>,
    request_id: &str,
) -> Result<Option<GroupVisibility>, ApiError> {
    raw.map(|v| {
        v.parse().map_err(|_| {
            validation::invalid(
                vec![FieldError::new("visibility", "must be 'private' or 'public'")],
                request_id,
            )
        })
    })
    .transpose()
}

async fn load_group(state: &AppState, id: GroupId, request_id: &str) -> Result<Group, ApiError> {
    state
        .store()
        .group(id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id, "Failed to load group"))?
        .ok_or_else(|| {
            ApiError::not_found("group_not_found", "Group not found").with_request_id(request_id)
        })
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: CookieJar,
    body: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();

    let req = validation::body(body, &request_id)?;
    validation::validate(&req, &request_id)?;
    let visibility = parse_visibility(req.visibility.as_deref(), &request_id)?.unwrap_or_default();

    // Anonymous creation is allowed, but rate limited per client IP.
    // Rejected bodies never count against the limit.
    let (creator, guest_token) = match ctx.user {
        Some(user) => (Creator::User(user), None),
        None => {
            let token = guest::admit_guest_creation(&state, &ctx).await?;
            (Creator::Guest(token.hash()), Some(token))
        }
    };

    let group = state
        .store()
        .create_group(
            NewGroup {
                name: req.name,
                description: req.description,
                emoji: req.emoji,
                visibility,
            },
            creator,
        )
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to create group"))?;

    info!(
        request_id = %request_id,
        group_id = %group.id,
        guest = guest_token.is_some(),
        "Group created"
    );

    let body = Json(CreatedGroup { group });
    Ok(match guest_token {
        Some(token) => {
            let jar = jar.add(token.cookie(state.settings().cookie_secure));
            (StatusCode::CREATED, jar, body).into_response()
        }
        None => (StatusCode::CREATED, body).into_response(),
    })
}

async fn list_groups(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let user = ctx.require_user()?;

    let groups = state
        .store()
        .list_groups_for(user)
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id, "Failed to list groups"))?;

    Ok(data(groups))
}

async fn get_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = ctx.require_user()?;
    let request_id = &ctx.request_id;
    let group_id: GroupId = validation::parse_id(&group_id, "group", request_id)?;

    let group = load_group(&state, group_id, request_id).await?;

    if group.visibility != GroupVisibility::Public
        && !authz::allows(&state, &ctx, group_id.into(), user, Action::ViewResource).await?
    {
        return Err(authz::forbidden(Action::ViewResource, request_id));
    }

    Ok(data(group))
}

async fn update_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(group_id): Path<String>,
    body: Result<Json<UpdateGroupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let group_id: GroupId = validation::parse_id(&group_id, "group", &request_id)?;
    authz::require(&state, &ctx, group_id.into(), Action::UpdateResource).await?;

    let req = validation::body(body, &request_id)?;
    validation::validate(&req, &request_id)?;
    let visibility = parse_visibility(req.visibility.as_deref(), &request_id)?;

    let group = state
        .store()
        .update_group(
            group_id,
            GroupPatch {
                name: req.name,
                description: req.description,
                emoji: req.emoji,
                visibility,
            },
        )
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to update group"))?;

    Ok(data(group))
}

async fn delete_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = &ctx.request_id;
    let group_id: GroupId = validation::parse_id(&group_id, "group", request_id)?;
    let user = authz::require(&state, &ctx, group_id.into(), Action::DeleteResource).await?;

    state
        .store()
        .delete_group(group_id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id, "Failed to delete group"))?;

    info!(request_id = %request_id, group_id = %group_id, user_id = %user, "Group deleted");
    Ok(data(Deleted { deleted: true }))
}

#[derive(Debug, Serialize)]
struct Joined {
    group_id: GroupId,
    /// Absent for guests, whose membership is provisional.
    #[serde(skip_serializing_if = "Option::is_none")]
    membership: Option<Membership>,
    guest: bool,
}

/// Join a public group, as a user or as a guest.
async fn join_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: CookieJar,
    Path(group_id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();
    let group_id: GroupId = validation::parse_id(&group_id, "group", &request_id)?;

    let group = load_group(&state, group_id, &request_id).await?;
    if group.visibility != GroupVisibility::Public {
        return Err(ApiError::forbidden(
            "forbidden",
            "Forbidden: this group is private, request access instead",
        )
        .with_request_id(&request_id));
    }

    let Some(user) = ctx.user else {
        let token = guest::guest_token_for(&state, &ctx).await?;
        state
            .store()
            .add_guest_membership(&token.hash(), group_id.into())
            .await
            .map_err(|e| ApiError::from_db(e, &request_id, "Failed to join group"))?;

        let jar = jar.add(token.cookie(state.settings().cookie_secure));
        let body = Joined {
            group_id,
            membership: None,
            guest: true,
        };
        return Ok((StatusCode::CREATED, jar, data(body)).into_response());
    };

    let existing = state
        .store()
        .membership(group_id.into(), user)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to join group"))?;
    if let Some(membership) = existing.filter(|m| m.status.is_active()) {
        let body = Joined {
            group_id,
            membership: Some(membership),
            guest: false,
        };
        return Ok((StatusCode::OK, data(body)).into_response());
    }

    let role = ResourceKind::Group.claim_role();
    let membership = match state
        .store()
        .add_membership(group_id.into(), user, role, MembershipStatus::Active)
        .await
    {
        Ok(membership) => membership,
        // A pending or invited row exists; accepting is the way in.
        Err(DbError::Conflict(_)) => state
            .store()
            .accept_invitation(group_id.into(), user)
            .await
            .map_err(|e| ApiError::from_db(e, &request_id, "Failed to join group"))?,
        Err(e) => return Err(ApiError::from_db(e, &request_id, "Failed to join group")),
    };

    info!(request_id = %request_id, group_id = %group_id, user_id = %user, "Joined public group");
    let body = Joined {
        group_id,
        membership: Some(membership),
        guest: false,
    };
    Ok((StatusCode::CREATED, data(body)).into_response())
}
