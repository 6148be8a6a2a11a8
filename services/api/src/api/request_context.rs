//! Request-scoped context extracted from HTTP requests.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use withme_id::{RequestId, UserId};

use crate::api::error::ApiError;
use crate::guest::{GuestToken, GUEST_COOKIE};

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Who is calling, as far as this service can tell.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Authenticated user, if a valid bearer identity was presented.
    pub user: Option<UserId>,
    /// Guest token from the `guest_token` cookie, if well-formed.
    pub guest_token: Option<GuestToken>,
    /// Client address claimed by `x-forwarded-for` or `x-real-ip`.
    pub forwarded_ip: Option<String>,
    /// Address of the socket peer, when the server recorded one.
    pub peer_ip: Option<String>,
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Resolves the bearer identity handed over by the upstream auth layer.
///
/// Only `Bearer user:<usr_id>` is accepted; any other shape is a 401 rather
/// than an anonymous request.
fn user_from_authorization_header(
    headers: &HeaderMap,
    request_id: &str,
) -> Result<Option<UserId>, ApiError> {
    let Some(auth_value) = header_string(headers, AUTHORIZATION_HEADER) else {
        return Ok(None);
    };

    let auth_value = auth_value.trim();
    let Some(token) = auth_value.strip_prefix("Bearer ") else {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization must be a Bearer token",
        )
        .with_request_id(request_id));
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization Bearer token cannot be empty",
        )
        .with_request_id(request_id));
    }

    let Some(user_id) = token.strip_prefix("user:") else {
        return Err(ApiError::unauthorized(
            "invalid_token",
            "token must be in the form 'user:<usr_id>'",
        )
        .with_request_id(request_id));
    };

    UserId::parse(user_id.trim()).map(Some).map_err(|_| {
        ApiError::unauthorized("invalid_token", "token subject is not a valid user id")
            .with_request_id(request_id)
    })
}

/// First `x-forwarded-for` hop, then `x-real-ip`.
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let first_hop = header_string(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()));
    first_hop
        .filter(|s| !s.is_empty())
        .or_else(|| header_string(headers, "x-real-ip").map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
}

fn peer_ip(parts: &Parts) -> Option<String> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

impl RequestContext {
    /// The authenticated user, or a 401.
    pub fn require_user(&self) -> Result<UserId, ApiError> {
        self.user.ok_or_else(|| {
            ApiError::unauthorized("unauthorized", "Authentication required")
                .with_request_id(self.request_id.clone())
        })
    }

    /// The rate-limit key for this caller.
    ///
    /// Forwarding headers are only honored behind a trusted proxy; otherwise
    /// any client could pick its own key.
    pub fn client_ip(&self, trust_proxy_headers: bool) -> &str {
        let forwarded = self.forwarded_ip.as_deref().filter(|_| trust_proxy_headers);
        forwarded
            .or(self.peer_ip.as_deref())
            .unwrap_or("unknown")
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = header_string(&parts.headers, REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty() && id.len() <= 128)
            .unwrap_or_else(|| RequestId::new().to_string());

        let user = user_from_authorization_header(&parts.headers, &request_id)?;

        let guest_token = CookieJar::from_headers(&parts.headers)
            .get(GUEST_COOKIE)
            .and_then(|cookie| GuestToken::parse(cookie.value()));

        Ok(Self {
            user,
            guest_token,
            forwarded_ip: forwarded_ip(&parts.headers),
            peer_ip: peer_ip(parts),
            request_id,
        })
    }
}
