//! Persistence for trips, groups and memberships.
//!
//! This module provides:
//! - The [`Store`] trait every handler talks to
//! - [`PgStore`], the Postgres implementation (SQLx)
//! - [`MemoryStore`], an in-process implementation for tests and local runs
//! - Connection pool management and migrations
//!
//! Every multi-row write (resource + creator membership, approve + membership,
//! note delete + resequence, guest claim) is a single transaction in
//! `PgStore` and a single critical section in `MemoryStore`.

mod error;
mod memory;
mod postgres;

pub use error::{Conflict, DbError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use withme_id::{AccessRequestId, GroupId, NoteId, TripId, UserId};
use withme_model::{
    AccessRequest, AccessRequestStatus, Group, GroupVisibility, GuestMembership, Membership,
    MembershipStatus, Note, ResourceId, Role, Trip,
};

use crate::guest::GuestTokenHash;

// =============================================================================
// Store Inputs
// =============================================================================

/// Who is creating a trip or group.
#[derive(Debug, Clone)]
pub enum Creator {
    /// Becomes an active member at the kind's creator role.
    User(UserId),
    /// Gets a guest membership under this token.
    Guest(GuestTokenHash),
}

#[derive(Debug, Clone, Default)]
pub struct NewTrip {
    pub name: String,
    pub description: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_public: bool,
}

/// Partial trip update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TripPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub emoji: Option<String>,
    pub visibility: GroupVisibility,
}

#[derive(Debug, Clone, Default)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub emoji: Option<String>,
    pub visibility: Option<GroupVisibility>,
}

#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Result of approving an access request.
#[derive(Debug, Clone)]
pub struct Approval {
    pub request: AccessRequest,
    pub membership: Membership,
}

/// Result of claiming a guest token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimOutcome {
    /// Resources that gained a new active membership, in guest-join order.
    pub claimed: Vec<ResourceId>,
    /// Resources where the user was already a member; the guest row was dropped.
    pub skipped: Vec<ResourceId>,
    /// The token had been claimed before; nothing changed.
    pub already_claimed: bool,
}

// =============================================================================
// Store
// =============================================================================

/// Everything the API needs from persistence.
///
/// Implementations must keep at most one membership row per
/// `(resource, user)` and report a duplicate insert as
/// [`Conflict::AlreadyMember`], never as an infrastructure error.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check that the backing store is reachable.
    async fn health_check(&self) -> Result<(), DbError>;

    // --- memberships -------------------------------------------------------

    /// The membership row for a pair, whatever its status.
    async fn membership(
        &self,
        resource: ResourceId,
        user: UserId,
    ) -> Result<Option<Membership>, DbError>;

    async fn list_memberships(&self, resource: ResourceId) -> Result<Vec<Membership>, DbError>;

    /// Insert a membership; an existing row for the pair is a conflict.
    async fn add_membership(
        &self,
        resource: ResourceId,
        user: UserId,
        role: Role,
        status: MembershipStatus,
    ) -> Result<Membership, DbError>;

    /// Move an `invited` membership to `active`. Already-active is returned as is.
    async fn accept_invitation(
        &self,
        resource: ResourceId,
        user: UserId,
    ) -> Result<Membership, DbError>;

    /// Change a member's role, refusing to demote the last creator-role holder.
    async fn update_membership_role(
        &self,
        resource: ResourceId,
        user: UserId,
        role: Role,
    ) -> Result<Membership, DbError>;

    /// Delete a membership, refusing to remove the last creator-role holder.
    async fn remove_membership(&self, resource: ResourceId, user: UserId) -> Result<(), DbError>;

    // --- trips -------------------------------------------------------------

    async fn create_trip(&self, trip: NewTrip, creator: Creator) -> Result<Trip, DbError>;

    async fn trip(&self, id: TripId) -> Result<Option<Trip>, DbError>;

    /// Trips where `user` holds an active membership, newest first.
    async fn list_trips_for(&self, user: UserId) -> Result<Vec<Trip>, DbError>;

    async fn update_trip(&self, id: TripId, patch: TripPatch) -> Result<Trip, DbError>;

    /// Delete a trip with its notes, memberships, requests and guest rows.
    async fn delete_trip(&self, id: TripId) -> Result<(), DbError>;

    // --- groups ------------------------------------------------------------

    async fn create_group(&self, group: NewGroup, creator: Creator) -> Result<Group, DbError>;

    async fn group(&self, id: GroupId) -> Result<Option<Group>, DbError>;

    async fn list_groups_for(&self, user: UserId) -> Result<Vec<Group>, DbError>;

    async fn update_group(&self, id: GroupId, patch: GroupPatch) -> Result<Group, DbError>;

    async fn delete_group(&self, id: GroupId) -> Result<(), DbError>;

    // --- notes -------------------------------------------------------------

    /// Notes of a trip ordered by position.
    async fn list_notes(&self, trip: TripId) -> Result<Vec<Note>, DbError>;

    async fn note(&self, trip: TripId, note: NoteId) -> Result<Option<Note>, DbError>;

    /// Append a note at the end of the trip's ordering.
    async fn create_note(&self, trip: TripId, note: NewNote, author: UserId)
        -> Result<Note, DbError>;

    async fn update_note(
        &self,
        trip: TripId,
        note: NoteId,
        patch: NotePatch,
        editor: UserId,
    ) -> Result<Note, DbError>;

    /// Delete a note and close the gap in its siblings' positions, atomically.
    async fn delete_note(&self, trip: TripId, note: NoteId) -> Result<(), DbError>;

    // --- access requests ---------------------------------------------------

    /// Open a pending request. Fails if one is pending or the user is already a member.
    async fn create_access_request(
        &self,
        resource: ResourceId,
        requester: UserId,
        message: Option<String>,
    ) -> Result<AccessRequest, DbError>;

    async fn access_request(
        &self,
        resource: ResourceId,
        id: AccessRequestId,
    ) -> Result<Option<AccessRequest>, DbError>;

    async fn list_access_requests(
        &self,
        resource: ResourceId,
        status: Option<AccessRequestStatus>,
    ) -> Result<Vec<AccessRequest>, DbError>;

    /// Approve a pending request and provision the membership in one step.
    ///
    /// An existing active membership keeps its role; a pending or invited one
    /// is activated at `role`. A request that is no longer pending yields
    /// [`Conflict::AlreadyResolved`] and changes nothing.
    async fn approve_access_request(
        &self,
        resource: ResourceId,
        id: AccessRequestId,
        role: Role,
        approver: UserId,
    ) -> Result<Approval, DbError>;

    async fn deny_access_request(
        &self,
        resource: ResourceId,
        id: AccessRequestId,
        reason: Option<String>,
        approver: UserId,
    ) -> Result<AccessRequest, DbError>;

    // --- guests ------------------------------------------------------------

    /// `false` once the token has been claimed; unknown tokens are usable.
    async fn guest_token_usable(&self, token: &GuestTokenHash) -> Result<bool, DbError>;

    /// Record a guest membership, registering the token if needed. Idempotent.
    async fn add_guest_membership(
        &self,
        token: &GuestTokenHash,
        resource: ResourceId,
    ) -> Result<(), DbError>;

    async fn guest_memberships(
        &self,
        token: &GuestTokenHash,
    ) -> Result<Vec<GuestMembership>, DbError>;

    /// Convert every guest membership of `token` into an active membership of `user`.
    async fn claim_guest_memberships(
        &self,
        token: &GuestTokenHash,
        user: UserId,
    ) -> Result<ClaimOutcome, DbError>;
}

// =============================================================================
// Connection Pool
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/withme".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_connections);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..defaults
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the first migrations directory found.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let candidates = [
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/api/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(DbError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// A [`Store`] backed by this pool.
    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }
}
