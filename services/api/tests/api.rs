//! Router-level tests over the in-memory store.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use withme_api::{
    api,
    db::MemoryStore,
    rate_limit::FixedWindowLimiter,
    state::{AppState, Settings},
};
use withme_id::UserId;

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
}

fn app_with(limit: u32, window: Duration, settings: Settings) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        store.clone(),
        Arc::new(FixedWindowLimiter::new(limit, window)),
        settings,
    );
    TestApp {
        router: api::create_router(state),
        store,
    }
}

fn app_with_limit(limit: u32, window: Duration) -> TestApp {
    app_with(limit, window, Settings::default())
}

fn app() -> TestApp {
    app_with_limit(5, Duration::from_secs(3600))
}

/// Builder for one request; `send` runs it through the router.
struct Call {
    method: Method,
    uri: String,
    user: Option<UserId>,
    cookie: Option<String>,
    peer: Option<&'static str>,
    forwarded_for: Option<String>,
    body: Option<Value>,
}

fn call(method: Method, uri: impl Into<String>) -> Call {
    Call {
        method,
        uri: uri.into(),
        user: None,
        cookie: None,
        peer: None,
        forwarded_for: None,
        body: None,
    }
}

impl Call {
    fn user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    fn cookie(mut self, cookie: &str) -> Self {
        self.cookie = Some(cookie.to_string());
        self
    }

    /// Socket peer address, as recorded by the server.
    fn ip(mut self, ip: &'static str) -> Self {
        self.peer = Some(ip);
        self
    }

    fn forwarded_for(mut self, ip: impl Into<String>) -> Self {
        self.forwarded_for = Some(ip.into());
        self
    }

    fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    async fn send(self, app: &TestApp) -> Reply {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(user) = self.user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer user:{user}"));
        }
        if let Some(cookie) = self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        if let Some(ip) = self.forwarded_for {
            builder = builder.header("x-forwarded-for", ip);
        }
        let mut request = match self.body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        if let Some(peer) = self.peer {
            let ip: IpAddr = peer.parse().unwrap();
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::new(ip, 40000)));
        }

        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            headers,
            body,
        }
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Reply {
    /// `guest_token=<value>` from the Set-Cookie header, if any.
    fn guest_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("guest_token="))
            .map(|v| v.split(';').next().unwrap_or_default().to_string())
    }

    fn set_cookie_raw(&self) -> String {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

async fn create_trip(app: &TestApp, user: UserId, name: &str) -> String {
    let reply = call(Method::POST, "/api/trips")
        .user(user)
        .json(json!({ "name": name }))
        .send(app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    reply.body["trip"]["id"].as_str().unwrap().to_string()
}

/// Invite `user` at `role` and have them accept.
async fn add_member(app: &TestApp, trip: &str, admin: UserId, user: UserId, role: &str) {
    let reply = call(Method::POST, format!("/api/trips/{trip}/members"))
        .user(admin)
        .json(json!({ "user_id": user.to_string(), "role": role }))
        .send(app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    assert_eq!(reply.body["data"]["status"], "invited");

    let reply = call(Method::POST, format!("/api/trips/{trip}/members/accept"))
        .user(user)
        .send(app)
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["status"], "active");
}

async fn create_note(app: &TestApp, trip: &str, author: UserId, title: &str) -> String {
    let reply = call(Method::POST, format!("/api/trips/{trip}/notes"))
        .user(author)
        .json(json!({ "title": title, "content": "" }))
        .send(app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    reply.body["data"]["id"].as_str().unwrap().to_string()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn health_endpoints_answer() {
    let app = app();
    for path in ["/healthz", "/livez", "/readyz"] {
        let reply = call(Method::GET, path).send(&app).await;
        assert_eq!(reply.status, StatusCode::OK, "{path}");
        assert_eq!(reply.body["status"], "ok");
    }
}

#[tokio::test]
async fn unavailable_store_is_500_and_not_ready() {
    let app = app();
    let user = UserId::new();
    let trip = create_trip(&app, user, "Lisbon").await;

    app.store.set_unavailable(true);

    let reply = call(Method::GET, "/api/trips").user(user).send(&app).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body["code"], "internal_error");
    assert!(reply.body.get("data").is_none());

    // Authorization failures surface as 500, never as 403.
    let reply = call(Method::GET, format!("/api/trips/{trip}/members"))
        .user(user)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);

    let reply = call(Method::GET, "/readyz").send(&app).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.body["components"]["store"]["status"], "unavailable");
}

// =============================================================================
// Authentication and parsing
// =============================================================================

#[tokio::test]
async fn anonymous_and_malformed_requests() {
    let app = app();

    let reply = call(Method::GET, "/api/trips").send(&app).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.body["request_id"].as_str().is_some());

    let reply = call(Method::GET, "/api/trips/not-a-trip")
        .user(UserId::new())
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "invalid_trip_id");

    // A group id where a trip id is expected.
    let reply = call(Method::GET, "/api/trips/grp_01HV4Z3MXNKPQR9HSTZ7WCLD4E")
        .user(UserId::new())
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_trip_validates_body() {
    let app = app();
    let reply = call(Method::POST, "/api/trips")
        .user(UserId::new())
        .json(json!({ "name": "", "start_date": "2026-05-10", "end_date": "2026-05-01" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "validation_failed");
    assert_eq!(reply.body["details"][0]["field"], "name");
}

// =============================================================================
// Trips and memberships
// =============================================================================

#[tokio::test]
async fn creator_is_admin_and_outsiders_are_forbidden() {
    let app = app();
    let admin = UserId::new();
    let trip = create_trip(&app, admin, "Kyoto").await;

    let reply = call(Method::GET, format!("/api/trips/{trip}/members"))
        .user(admin)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"][0]["role"], "admin");

    let reply = call(Method::GET, format!("/api/trips/{trip}"))
        .user(UserId::new())
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert!(reply.body["error"].as_str().unwrap().starts_with("Forbidden:"));

    let reply = call(Method::GET, "/api/trips").user(admin).send(&app).await;
    assert_eq!(reply.body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn role_change_reflects_on_next_request() {
    let app = app();
    let admin = UserId::new();
    let member = UserId::new();
    let trip = create_trip(&app, admin, "Oslo").await;
    add_member(&app, &trip, admin, member, "viewer").await;

    let rename = || {
        call(Method::PATCH, format!("/api/trips/{trip}"))
            .user(member)
            .json(json!({ "name": "Bergen" }))
    };
    assert_eq!(rename().send(&app).await.status, StatusCode::FORBIDDEN);

    let reply = call(Method::PATCH, format!("/api/trips/{trip}/members/{member}"))
        .user(admin)
        .json(json!({ "role": "editor" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);

    let reply = rename().send(&app).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["name"], "Bergen");
}

#[tokio::test]
async fn trip_roles_exclude_owner() {
    let app = app();
    let admin = UserId::new();
    let trip = create_trip(&app, admin, "Rome").await;

    let reply = call(Method::POST, format!("/api/trips/{trip}/members"))
        .user(admin)
        .json(json!({ "user_id": UserId::new().to_string(), "role": "owner" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["details"][0]["field"], "role");
}

#[tokio::test]
async fn last_admin_cannot_leave() {
    let app = app();
    let admin = UserId::new();
    let trip = create_trip(&app, admin, "Cairo").await;

    let reply = call(Method::DELETE, format!("/api/trips/{trip}/members/{admin}"))
        .user(admin)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["code"], "last_owner");
}

#[tokio::test]
async fn member_can_leave() {
    let app = app();
    let admin = UserId::new();
    let member = UserId::new();
    let trip = create_trip(&app, admin, "Nice").await;
    add_member(&app, &trip, admin, member, "contributor").await;

    let reply = call(Method::DELETE, format!("/api/trips/{trip}/members/{member}"))
        .user(member)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["removed"], true);

    let reply = call(Method::GET, format!("/api/trips/{trip}"))
        .user(member)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

// =============================================================================
// Notes
// =============================================================================

#[tokio::test]
async fn viewer_cannot_edit_someone_elses_note() {
    let app = app();
    let admin = UserId::new();
    let viewer = UserId::new();
    let trip = create_trip(&app, admin, "Hanoi").await;
    add_member(&app, &trip, admin, viewer, "viewer").await;
    let note = create_note(&app, &trip, admin, "Packing list").await;

    let reply = call(Method::PUT, format!("/api/trips/{trip}/notes/{note}"))
        .user(viewer)
        .json(json!({ "content": "sunscreen" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["code"], "forbidden");
    assert!(reply.body["error"].as_str().unwrap().starts_with("Forbidden:"));

    // Viewers may still read.
    let reply = call(Method::GET, format!("/api/trips/{trip}/notes"))
        .user(viewer)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"][0]["title"], "Packing list");
}

#[tokio::test]
async fn last_updater_may_edit_until_someone_else_does() {
    let app = app();
    let admin = UserId::new();
    let author = UserId::new();
    let trip = create_trip(&app, admin, "Lima").await;
    add_member(&app, &trip, admin, author, "contributor").await;
    let note = create_note(&app, &trip, author, "Food").await;

    let edit = |user: UserId, content: &str| {
        call(Method::PUT, format!("/api/trips/{trip}/notes/{note}"))
            .user(user)
            .json(json!({ "content": content }))
    };

    let reply = edit(author, "ceviche").send(&app).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["content"], "ceviche");

    let reply = edit(admin, "ceviche, anticuchos").send(&app).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = edit(author, "just ceviche").send(&app).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn deleting_a_note_resequences_the_rest() {
    let app = app();
    let admin = UserId::new();
    let trip = create_trip(&app, admin, "Quito").await;
    let first = create_note(&app, &trip, admin, "one").await;
    create_note(&app, &trip, admin, "two").await;
    create_note(&app, &trip, admin, "three").await;

    let reply = call(Method::DELETE, format!("/api/trips/{trip}/notes/{first}"))
        .user(admin)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["deleted"], true);

    let reply = call(Method::GET, format!("/api/trips/{trip}/notes"))
        .user(admin)
        .send(&app)
        .await;
    let notes = reply.body["data"].as_array().unwrap();
    let order: Vec<(&str, i64)> = notes
        .iter()
        .map(|n| (n["title"].as_str().unwrap(), n["position"].as_i64().unwrap()))
        .collect();
    assert_eq!(order, vec![("two", 0), ("three", 1)]);
}

#[tokio::test]
async fn note_content_is_bounded() {
    let app = app();
    let admin = UserId::new();
    let trip = create_trip(&app, admin, "Cusco").await;

    let reply = call(Method::POST, format!("/api/trips/{trip}/notes"))
        .user(admin)
        .json(json!({ "title": "Itinerary", "content": "x".repeat(20_001) }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "validation_failed");
    assert_eq!(reply.body["details"][0]["field"], "content");

    let reply = call(Method::POST, format!("/api/trips/{trip}/notes"))
        .user(admin)
        .json(json!({ "title": "Itinerary", "content": "x".repeat(20_000) }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    let note = reply.body["data"]["id"].as_str().unwrap().to_string();

    let reply = call(Method::PUT, format!("/api/trips/{trip}/notes/{note}"))
        .user(admin)
        .json(json!({ "content": "x".repeat(20_001) }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["details"][0]["field"], "content");
}

// =============================================================================
// Access requests
// =============================================================================

async fn request_access(app: &TestApp, trip: &str, requester: UserId) -> String {
    let reply = call(Method::POST, format!("/api/trips/{trip}/access-requests"))
        .user(requester)
        .json(json!({ "message": "Can I come along?" }))
        .send(app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    assert_eq!(reply.body["data"]["status"], "pending");
    reply.body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn approving_twice_creates_one_membership() {
    let app = app();
    let admin = UserId::new();
    let requester = UserId::new();
    let trip = create_trip(&app, admin, "Seoul").await;
    let request = request_access(&app, &trip, requester).await;

    let approve = || {
        call(
            Method::POST,
            format!("/api/trips/{trip}/access-requests/{request}/approve"),
        )
        .user(admin)
        .json(json!({ "role": "editor" }))
    };

    let reply = approve().send(&app).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["role"], "editor");
    assert_eq!(reply.body["data"]["request"]["status"], "approved");

    let reply = approve().send(&app).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["code"], "request_already_resolved");

    let reply = call(Method::GET, format!("/api/trips/{trip}/members"))
        .user(admin)
        .send(&app)
        .await;
    let members = reply.body["data"].as_array().unwrap();
    let requester_rows: Vec<_> = members
        .iter()
        .filter(|m| m["user_id"] == requester.to_string())
        .collect();
    assert_eq!(requester_rows.len(), 1);
    assert_eq!(requester_rows[0]["role"], "editor");

    // Authorized at the resolved role.
    let reply = call(Method::PATCH, format!("/api/trips/{trip}"))
        .user(requester)
        .json(json!({ "description": "kimchi" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn approval_defaults_to_viewer() {
    let app = app();
    let admin = UserId::new();
    let requester = UserId::new();
    let trip = create_trip(&app, admin, "Taipei").await;
    let request = request_access(&app, &trip, requester).await;

    let reply = call(
        Method::POST,
        format!("/api/trips/{trip}/access-requests/{request}/approve"),
    )
    .user(admin)
    .send(&app)
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["role"], "viewer");
}

#[tokio::test]
async fn approval_raises_a_member_who_joined_meanwhile() {
    let app = app();
    let admin = UserId::new();
    let requester = UserId::new();
    let trip = create_trip(&app, admin, "Busan").await;
    let request = request_access(&app, &trip, requester).await;
    add_member(&app, &trip, admin, requester, "viewer").await;

    let reply = call(
        Method::POST,
        format!("/api/trips/{trip}/access-requests/{request}/approve"),
    )
    .user(admin)
    .json(json!({ "role": "editor" }))
    .send(&app)
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["role"], "editor");
    assert_eq!(reply.body["data"]["membership"]["role"], "editor");
    assert_eq!(reply.body["data"]["request"]["resolved_role"], "editor");

    // The granted role is the one enforced.
    let reply = call(Method::POST, format!("/api/trips/{trip}/notes"))
        .user(requester)
        .json(json!({ "title": "Ferry times" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
}

#[tokio::test]
async fn approval_never_lowers_an_existing_role() {
    let app = app();
    let admin = UserId::new();
    let requester = UserId::new();
    let trip = create_trip(&app, admin, "Jeju").await;
    let request = request_access(&app, &trip, requester).await;
    add_member(&app, &trip, admin, requester, "editor").await;

    let reply = call(
        Method::POST,
        format!("/api/trips/{trip}/access-requests/{request}/approve"),
    )
    .user(admin)
    .json(json!({ "role": "viewer" }))
    .send(&app)
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["role"], "editor");
    assert_eq!(reply.body["data"]["request"]["resolved_role"], "editor");
}

#[tokio::test]
async fn denied_requester_stays_out() {
    let app = app();
    let admin = UserId::new();
    let requester = UserId::new();
    let trip = create_trip(&app, admin, "Dakar").await;
    let request = request_access(&app, &trip, requester).await;

    let reply = call(
        Method::POST,
        format!("/api/trips/{trip}/access-requests/{request}/deny"),
    )
    .user(admin)
    .json(json!({ "reason": "Full up" }))
    .send(&app)
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["status"], "denied");

    let reply = call(Method::GET, format!("/api/trips/{trip}"))
        .user(requester)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = call(
        Method::GET,
        format!("/api/trips/{trip}/access-requests?status=denied"),
    )
    .user(admin)
    .send(&app)
    .await;
    assert_eq!(reply.body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_pending_request_conflicts() {
    let app = app();
    let admin = UserId::new();
    let requester = UserId::new();
    let trip = create_trip(&app, admin, "Baku").await;
    request_access(&app, &trip, requester).await;

    let reply = call(Method::POST, format!("/api/trips/{trip}/access-requests"))
        .user(requester)
        .json(json!({}))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["code"], "request_pending");

    let reply = call(Method::POST, format!("/api/trips/{trip}/access-requests"))
        .user(admin)
        .json(json!({}))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["code"], "already_member");
}

#[tokio::test]
async fn only_reviewers_can_approve() {
    let app = app();
    let admin = UserId::new();
    let viewer = UserId::new();
    let requester = UserId::new();
    let trip = create_trip(&app, admin, "Tbilisi").await;
    add_member(&app, &trip, admin, viewer, "viewer").await;
    let request = request_access(&app, &trip, requester).await;

    let reply = call(
        Method::POST,
        format!("/api/trips/{trip}/access-requests/{request}/approve"),
    )
    .user(viewer)
    .send(&app)
    .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

// =============================================================================
// Guests
// =============================================================================

#[tokio::test]
async fn guest_group_creation_sets_cookie() {
    let app = app();
    let reply = call(Method::POST, "/api/groups")
        .ip("198.51.100.4")
        .json(json!({ "name": "Ski Trip" }))
        .send(&app)
        .await;

    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    assert_eq!(reply.body["group"]["name"], "Ski Trip");
    assert_eq!(reply.body["group"]["visibility"], "private");
    assert!(reply.body.get("data").is_none());

    let raw = reply.set_cookie_raw();
    assert!(raw.contains("guest_token="));
    assert!(raw.contains("HttpOnly"));
    assert!(raw.contains("SameSite=Lax"));

    // A presented token is reused rather than replaced.
    let cookie = reply.guest_cookie().unwrap();
    let reply = call(Method::POST, "/api/groups")
        .ip("198.51.100.4")
        .cookie(&cookie)
        .json(json!({ "name": "Après" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.guest_cookie().unwrap(), cookie);

    let reply = call(Method::GET, "/api/guest").cookie(&cookie).send(&app).await;
    assert_eq!(reply.body["data"]["resources"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn sixth_guest_trip_is_rate_limited() {
    let app = app_with_limit(5, Duration::from_millis(400));

    let create = |cookie: Option<&str>| {
        let c = call(Method::POST, "/api/trips")
            .ip("203.0.113.9")
            .json(json!({ "name": "Weekend away" }));
        match cookie {
            Some(cookie) => c.cookie(cookie),
            None => c,
        }
    };

    let first = create(None).send(&app).await;
    assert_eq!(first.status, StatusCode::CREATED);
    let cookie = first.guest_cookie().unwrap();
    for _ in 0..4 {
        assert_eq!(create(Some(&cookie)).send(&app).await.status, StatusCode::CREATED);
    }

    let limited = create(Some(&cookie)).send(&app).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.body["code"], "rate_limited");
    assert!(limited.headers.contains_key(header::RETRY_AFTER));

    // Nothing was created for the limited request.
    let reply = call(Method::GET, "/api/guest").cookie(&cookie).send(&app).await;
    assert_eq!(reply.body["data"]["resources"].as_array().unwrap().len(), 5);

    // Another client is unaffected.
    let other = call(Method::POST, "/api/trips")
        .ip("203.0.113.10")
        .json(json!({ "name": "Elsewhere" }))
        .send(&app)
        .await;
    assert_eq!(other.status, StatusCode::CREATED);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(create(Some(&cookie)).send(&app).await.status, StatusCode::CREATED);
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_bypass_the_limit() {
    let app = app();

    let mut statuses = Vec::new();
    for n in 1..=7 {
        let reply = call(Method::POST, "/api/trips")
            .ip("203.0.113.50")
            .forwarded_for(format!("198.51.100.{n}"))
            .json(json!({ "name": "Road trip" }))
            .send(&app)
            .await;
        statuses.push(reply.status);
    }
    assert_eq!(&statuses[..5], &[StatusCode::CREATED; 5]);
    assert_eq!(&statuses[5..], &[StatusCode::TOO_MANY_REQUESTS; 2]);
}

#[tokio::test]
async fn trusted_proxy_keys_on_forwarded_for() {
    let app = app_with(
        1,
        Duration::from_secs(3600),
        Settings {
            trust_proxy_headers: true,
            ..Settings::default()
        },
    );

    let create = |client: &str| {
        call(Method::POST, "/api/trips")
            .ip("10.0.0.2")
            .forwarded_for(client)
            .json(json!({ "name": "Behind the proxy" }))
    };

    assert_eq!(create("198.51.100.1").send(&app).await.status, StatusCode::CREATED);
    assert_eq!(create("198.51.100.2").send(&app).await.status, StatusCode::CREATED);
    assert_eq!(
        create("198.51.100.1").send(&app).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn rejected_guest_bodies_do_not_use_the_quota() {
    let app = app_with_limit(1, Duration::from_secs(3600));

    for _ in 0..3 {
        let reply = call(Method::POST, "/api/groups")
            .ip("192.0.2.77")
            .json(json!({ "name": "" }))
            .send(&app)
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    let reply = call(Method::POST, "/api/trips")
        .ip("192.0.2.77")
        .json(json!({ "name": "Finally" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
}

#[tokio::test]
async fn authenticated_creation_is_not_rate_limited() {
    let app = app_with_limit(1, Duration::from_secs(3600));
    let user = UserId::new();
    for name in ["a", "b", "c"] {
        let reply = call(Method::POST, "/api/trips")
            .ip("192.0.2.1")
            .user(user)
            .json(json!({ "name": name }))
            .send(&app)
            .await;
        assert_eq!(reply.status, StatusCode::CREATED);
        assert!(reply.guest_cookie().is_none());
    }
}

#[tokio::test]
async fn guest_claim_converts_every_guest_membership() {
    let app = app();
    let owner = UserId::new();

    let reply = call(Method::POST, "/api/groups")
        .user(owner)
        .json(json!({ "name": "Open Hikers", "visibility": "public" }))
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    let group = reply.body["group"]["id"].as_str().unwrap().to_string();

    // Two guest trips and one guest join.
    let first = call(Method::POST, "/api/trips")
        .ip("198.51.100.20")
        .json(json!({ "name": "Day hike" }))
        .send(&app)
        .await;
    let cookie = first.guest_cookie().unwrap();
    let second = call(Method::POST, "/api/trips")
        .ip("198.51.100.20")
        .cookie(&cookie)
        .json(json!({ "name": "Overnight" }))
        .send(&app)
        .await;
    assert_eq!(second.status, StatusCode::CREATED);
    let joined = call(Method::POST, format!("/api/groups/{group}/join"))
        .cookie(&cookie)
        .send(&app)
        .await;
    assert_eq!(joined.status, StatusCode::CREATED, "{}", joined.body);

    let user = UserId::new();
    let reply = call(Method::POST, "/api/guest/claim")
        .user(user)
        .cookie(&cookie)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["claimed"].as_array().unwrap().len(), 3);
    assert_eq!(reply.body["data"]["already_claimed"], false);
    assert!(reply.body["data"]["notification"]["message"].is_string());
    let raw = reply.set_cookie_raw();
    assert!(raw.contains("guest_token="));
    assert!(raw.contains("Max-Age=0"));

    let reply = call(Method::GET, "/api/guest").cookie(&cookie).send(&app).await;
    assert!(reply.body["data"]["resources"].as_array().unwrap().is_empty());

    let reply = call(Method::GET, "/api/trips").user(user).send(&app).await;
    assert_eq!(reply.body["data"].as_array().unwrap().len(), 2);

    let reply = call(Method::GET, format!("/api/groups/{group}/members"))
        .user(owner)
        .send(&app)
        .await;
    let roles: Vec<&str> = reply.body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|m| m["user_id"] == user.to_string())
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["contributor"]);

    // Claiming again changes nothing.
    let reply = call(Method::POST, "/api/guest/claim")
        .user(user)
        .cookie(&cookie)
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["already_claimed"], true);
    assert!(reply.body["data"]["claimed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn claim_needs_a_guest_cookie() {
    let app = app();
    let reply = call(Method::POST, "/api/guest/claim")
        .user(UserId::new())
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "missing_guest_token");
}

#[tokio::test]
async fn private_groups_cannot_be_joined() {
    let app = app();
    let owner = UserId::new();
    let reply = call(Method::POST, "/api/groups")
        .user(owner)
        .json(json!({ "name": "Family" }))
        .send(&app)
        .await;
    let group = reply.body["group"]["id"].as_str().unwrap().to_string();

    let reply = call(Method::POST, format!("/api/groups/{group}/join"))
        .user(UserId::new())
        .send(&app)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}
