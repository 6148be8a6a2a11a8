//! Guest sessions: listing and claiming what a guest token created.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use tracing::{info, warn};
use withme_model::{GuestMembership, ResourceId, ResourceKind};

use super::data;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::guest::{removal_cookie, GuestToken};
use crate::rate_limit::RateDecision;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_guest_resources))
        .route("/claim", post(claim))
}

/// Gate an unauthenticated create and pick the guest token to record it under.
///
/// Counts the request against the caller's IP first, so a limited request
/// creates nothing. A presented token is reused unless it was already
/// claimed, in which case a fresh one is minted.
pub(super) async fn admit_guest_creation(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GuestToken, ApiError> {
    let request_id = &ctx.request_id;
    let client_ip = ctx.client_ip(state.settings().trust_proxy_headers);

    match state.guest_limiter().hit(client_ip).await {
        Ok(RateDecision::Allowed { .. }) => {}
        Ok(RateDecision::Limited { retry_after }) => {
            let seconds = u32::try_from(retry_after.as_secs().max(1)).unwrap_or(u32::MAX);
            warn!(
                request_id = %request_id,
                client_ip = %client_ip,
                retry_after_seconds = seconds,
                "Guest creation rate limited"
            );
            return Err(ApiError::too_many_requests(
                "rate_limited",
                "Too many requests. Sign in or try again later.",
            )
            .with_retry_after_seconds(seconds)
            .with_request_id(request_id));
        }
        Err(e) => {
            tracing::error!(error = %e, request_id = %request_id, "Rate limiter failed");
            return Err(ApiError::internal("internal_error", "Failed to check rate limit")
                .with_request_id(request_id));
        }
    }

    guest_token_for(state, ctx).await
}

/// The caller's usable guest token, or a freshly minted one.
pub(super) async fn guest_token_for(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GuestToken, ApiError> {
    if let Some(token) = ctx.guest_token {
        let usable = state
            .store()
            .guest_token_usable(&token.hash())
            .await
            .map_err(|e| ApiError::from_db(e, &ctx.request_id, "Failed to check guest token"))?;
        if usable {
            return Ok(token);
        }
    }
    Ok(GuestToken::mint())
}

#[derive(Debug, Serialize)]
struct GuestResources {
    resources: Vec<GuestMembership>,
}

async fn list_guest_resources(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let resources = match ctx.guest_token {
        Some(token) => state
            .store()
            .guest_memberships(&token.hash())
            .await
            .map_err(|e| {
                ApiError::from_db(e, &ctx.request_id, "Failed to list guest memberships")
            })?,
        None => Vec::new(),
    };

    Ok(data(GuestResources { resources }))
}

/// Shown once, right after a claim, about the first resource saved.
#[derive(Debug, Serialize)]
struct ClaimNotification {
    resource_id: ResourceId,
    resource_kind: ResourceKind,
    message: String,
}

#[derive(Debug, Serialize)]
struct ClaimResponse {
    claimed: Vec<ResourceId>,
    skipped: Vec<ResourceId>,
    already_claimed: bool,
    notification: Option<ClaimNotification>,
}

async fn claim(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let user = ctx.require_user()?;
    let request_id = &ctx.request_id;

    let Some(token) = ctx.guest_token else {
        return Err(
            ApiError::bad_request("missing_guest_token", "No guest session to claim")
                .with_request_id(request_id),
        );
    };

    let outcome = state
        .store()
        .claim_guest_memberships(&token.hash(), user)
        .await
        .map_err(|e| ApiError::from_db(e, request_id, "Failed to claim guest memberships"))?;

    info!(
        request_id = %request_id,
        user_id = %user,
        claimed = outcome.claimed.len(),
        already_claimed = outcome.already_claimed,
        "Guest claim"
    );

    let notification = outcome.claimed.first().map(|resource| ClaimNotification {
        resource_id: *resource,
        resource_kind: resource.kind(),
        message: format!("Your {} has been saved to your account.", resource.kind()),
    });

    let body = ClaimResponse {
        claimed: outcome.claimed,
        skipped: outcome.skipped,
        already_claimed: outcome.already_claimed,
        notification,
    };

    Ok((jar.remove(removal_cookie()), data(body)))
}
