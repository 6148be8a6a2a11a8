//! Authorization helpers.
//!
//! Every protected handler goes through [`require`], which turns the
//! oracle's answer into 401 / 403 / 500.

use withme_id::UserId;
use withme_model::{ResourceId, Role};

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::policy::Action;
use crate::state::AppState;

pub fn forbidden(action: Action, request_id: &str) -> ApiError {
    ApiError::forbidden("forbidden", format!("Forbidden: {}", action.describe()))
        .with_request_id(request_id)
}

/// Require an authenticated caller allowed to perform `action` on `resource`.
pub async fn require(
    state: &AppState,
    ctx: &RequestContext,
    resource: ResourceId,
    action: Action,
) -> Result<UserId, ApiError> {
    let user = ctx.require_user()?;

    let allowed = state
        .oracle()
        .check(resource, user, action)
        .await
        .map_err(|e| ApiError::from_oracle(e, &ctx.request_id))?;

    if !allowed {
        tracing::debug!(
            request_id = %ctx.request_id,
            resource_id = %resource,
            user_id = %user,
            ?action,
            "Authorization denied"
        );
        return Err(forbidden(action, &ctx.request_id));
    }
    Ok(user)
}

/// Like [`require`], but reports the answer instead of failing on `false`.
pub async fn allows(
    state: &AppState,
    ctx: &RequestContext,
    resource: ResourceId,
    user: UserId,
    action: Action,
) -> Result<bool, ApiError> {
    state
        .oracle()
        .check(resource, user, action)
        .await
        .map_err(|e| ApiError::from_oracle(e, &ctx.request_id))
}

/// Whether `user` is an active member at any role.
pub async fn is_member(
    state: &AppState,
    ctx: &RequestContext,
    resource: ResourceId,
    user: UserId,
) -> Result<bool, ApiError> {
    state
        .oracle()
        .is_member(resource, user)
        .await
        .map_err(|e| ApiError::from_oracle(e, &ctx.request_id))
}

/// Only an owner may hand out, change or take away the owner role.
///
/// `roles` are the roles the change touches; the check is skipped unless
/// one of them is `owner`.
pub async fn require_owner_for(
    state: &AppState,
    ctx: &RequestContext,
    resource: ResourceId,
    caller: UserId,
    roles: &[Role],
) -> Result<(), ApiError> {
    if !roles.contains(&Role::Owner) {
        return Ok(());
    }
    let caller_role = state
        .oracle()
        .role_of(resource, caller)
        .await
        .map_err(|e| ApiError::from_oracle(e, &ctx.request_id))?;
    if caller_role != Some(Role::Owner) {
        return Err(ApiError::forbidden(
            "forbidden",
            "Forbidden: only an owner can grant or revoke the owner role",
        )
        .with_request_id(&ctx.request_id));
    }
    Ok(())
}
