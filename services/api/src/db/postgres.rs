//! Postgres-backed [`Store`].
//!
//! Rows are read into plain string structs and decoded into model records
//! afterwards; a value the model cannot parse surfaces as
//! [`DbError::Corrupt`] instead of a panic.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use withme_id::{AccessRequestId, GroupId, MembershipId, NoteId, TripId, UserId};
use withme_model::{
    AccessRequest, AccessRequestStatus, Group, GuestMembership, Membership, MembershipStatus,
    Note, ResourceId, Role, Trip,
};

use super::error::is_unique_violation;
use super::{
    Approval, ClaimOutcome, Conflict, Creator, DbError, GroupPatch, NewGroup, NewNote, NewTrip,
    NotePatch, Store, TripPatch,
};
use crate::guest::GuestTokenHash;

/// [`Store`] over a SQLx Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode<T>(column: &'static str, raw: &str) -> Result<T, DbError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse()
        .map_err(|e| DbError::Corrupt(format!("{column} {raw:?}: {e}")))
}

fn decode_opt<T>(column: &'static str, raw: Option<&str>) -> Result<Option<T>, DbError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.map(|raw| decode(column, raw)).transpose()
}

// =============================================================================
// Rows
// =============================================================================

struct MembershipRow {
    membership_id: String,
    resource_id: String,
    user_id: String,
    role: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for MembershipRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            membership_id: row.try_get("membership_id")?,
            resource_id: row.try_get("resource_id")?,
            user_id: row.try_get("user_id")?,
            role: row.try_get("role")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<MembershipRow> for Membership {
    type Error = DbError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Membership {
            id: decode::<MembershipId>("membership_id", &row.membership_id)?,
            resource_id: decode("resource_id", &row.resource_id)?,
            user_id: decode("user_id", &row.user_id)?,
            role: decode("role", &row.role)?,
            status: decode("status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct TripRow {
    trip_id: String,
    name: String,
    description: Option<String>,
    destination: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    is_public: bool,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for TripRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            trip_id: row.try_get("trip_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            destination: row.try_get("destination")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            is_public: row.try_get("is_public")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<TripRow> for Trip {
    type Error = DbError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        Ok(Trip {
            id: decode("trip_id", &row.trip_id)?,
            name: row.name,
            description: row.description,
            destination: row.destination,
            start_date: row.start_date,
            end_date: row.end_date,
            is_public: row.is_public,
            created_by: decode_opt("created_by", row.created_by.as_deref())?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct GroupRow {
    group_id: String,
    name: String,
    description: Option<String>,
    emoji: Option<String>,
    visibility: String,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for GroupRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            group_id: row.try_get("group_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            emoji: row.try_get("emoji")?,
            visibility: row.try_get("visibility")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<GroupRow> for Group {
    type Error = DbError;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        Ok(Group {
            id: decode("group_id", &row.group_id)?,
            name: row.name,
            description: row.description,
            emoji: row.emoji,
            visibility: decode("visibility", &row.visibility)?,
            created_by: decode_opt("created_by", row.created_by.as_deref())?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct NoteRow {
    note_id: String,
    trip_id: String,
    title: String,
    content: String,
    position: i32,
    created_by: Option<String>,
    updated_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for NoteRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            note_id: row.try_get("note_id")?,
            trip_id: row.try_get("trip_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            position: row.try_get("position")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<NoteRow> for Note {
    type Error = DbError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        Ok(Note {
            id: decode("note_id", &row.note_id)?,
            trip_id: decode("trip_id", &row.trip_id)?,
            title: row.title,
            content: row.content,
            position: row.position,
            created_by: decode_opt("created_by", row.created_by.as_deref())?,
            updated_by: decode_opt("updated_by", row.updated_by.as_deref())?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct AccessRequestRow {
    request_id: String,
    resource_id: String,
    requester: String,
    message: Option<String>,
    status: String,
    resolved_role: Option<String>,
    resolved_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    denial_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for AccessRequestRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            request_id: row.try_get("request_id")?,
            resource_id: row.try_get("resource_id")?,
            requester: row.try_get("requester")?,
            message: row.try_get("message")?,
            status: row.try_get("status")?,
            resolved_role: row.try_get("resolved_role")?,
            resolved_by: row.try_get("resolved_by")?,
            resolved_at: row.try_get("resolved_at")?,
            denial_reason: row.try_get("denial_reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<AccessRequestRow> for AccessRequest {
    type Error = DbError;

    fn try_from(row: AccessRequestRow) -> Result<Self, Self::Error> {
        Ok(AccessRequest {
            id: decode("request_id", &row.request_id)?,
            resource_id: decode("resource_id", &row.resource_id)?,
            requester: decode("requester", &row.requester)?,
            message: row.message,
            status: decode("status", &row.status)?,
            resolved_role: decode_opt::<Role>("resolved_role", row.resolved_role.as_deref())?,
            resolved_by: decode_opt("resolved_by", row.resolved_by.as_deref())?,
            resolved_at: row.resolved_at,
            denial_reason: row.denial_reason,
            created_at: row.created_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, DbError>
where
    T: TryFrom<R, Error = DbError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =============================================================================
// Shared statements
// =============================================================================

async fn fetch_membership(
    conn: &mut PgConnection,
    resource: ResourceId,
    user: UserId,
    lock: bool,
) -> Result<Option<Membership>, DbError> {
    let sql = if lock {
        r#"
        SELECT membership_id, resource_id, user_id, role, status, created_at, updated_at
        FROM memberships
        WHERE resource_id = $1 AND user_id = $2
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT membership_id, resource_id, user_id, role, status, created_at, updated_at
        FROM memberships
        WHERE resource_id = $1 AND user_id = $2
        "#
    };

    sqlx::query_as::<_, MembershipRow>(sql)
        .bind(resource.to_string())
        .bind(user.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .map(Membership::try_from)
        .transpose()
}

async fn insert_membership(
    conn: &mut PgConnection,
    resource: ResourceId,
    user: UserId,
    role: Role,
    status: MembershipStatus,
) -> Result<Membership, DbError> {
    let row = sqlx::query_as::<_, MembershipRow>(
        r#"
        INSERT INTO memberships (membership_id, resource_kind, resource_id, user_id, role, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (resource_id, user_id) DO NOTHING
        RETURNING membership_id, resource_id, user_id, role, status, created_at, updated_at
        "#,
    )
    .bind(MembershipId::new().to_string())
    .bind(resource.kind().as_str())
    .bind(resource.to_string())
    .bind(user.to_string())
    .bind(role.as_str())
    .bind(status.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row.try_into(),
        None => Err(DbError::Conflict(Conflict::AlreadyMember)),
    }
}

/// Refuse a change that would leave `current`'s resource without an active
/// creator-role member. Locks every such member until the transaction ends.
async fn guard_last_owner(
    conn: &mut PgConnection,
    current: &Membership,
    new_role: Option<Role>,
) -> Result<(), DbError> {
    let top = current.resource_id.kind().creator_role();
    if current.role != top || !current.status.is_active() || new_role == Some(top) {
        return Ok(());
    }

    let holders: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT membership_id FROM memberships
        WHERE resource_id = $1 AND role = $2 AND status = 'active'
        FOR UPDATE
        "#,
    )
    .bind(current.resource_id.to_string())
    .bind(top.as_str())
    .fetch_all(&mut *conn)
    .await?;

    if holders.len() <= 1 {
        return Err(DbError::Conflict(Conflict::LastOwner));
    }
    Ok(())
}

async fn add_guest(
    conn: &mut PgConnection,
    token: &GuestTokenHash,
    resource: ResourceId,
) -> Result<(), DbError> {
    sqlx::query("INSERT INTO guest_tokens (token_hash) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(token.as_str())
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO guest_memberships (token_hash, resource_kind, resource_id)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(token.as_str())
    .bind(resource.kind().as_str())
    .bind(resource.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn register_creator(
    conn: &mut PgConnection,
    resource: ResourceId,
    creator: &Creator,
) -> Result<(), DbError> {
    match creator {
        Creator::User(user) => {
            let role = resource.kind().creator_role();
            insert_membership(conn, resource, *user, role, MembershipStatus::Active).await?;
        }
        Creator::Guest(token) => add_guest(conn, token, resource).await?,
    }
    Ok(())
}

/// Remove everything that references a resource by id, ahead of deleting it.
async fn forget_resource(conn: &mut PgConnection, resource: ResourceId) -> Result<(), DbError> {
    let id = resource.to_string();
    for sql in [
        "DELETE FROM memberships WHERE resource_id = $1",
        "DELETE FROM access_requests WHERE resource_id = $1",
        "DELETE FROM guest_memberships WHERE resource_id = $1",
    ] {
        sqlx::query(sql).bind(&id).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn lock_access_request(
    conn: &mut PgConnection,
    resource: ResourceId,
    id: AccessRequestId,
) -> Result<AccessRequest, DbError> {
    sqlx::query_as::<_, AccessRequestRow>(
        r#"
        SELECT request_id, resource_id, requester, message, status, resolved_role,
               resolved_by, resolved_at, denial_reason, created_at
        FROM access_requests
        WHERE request_id = $1 AND resource_id = $2
        FOR UPDATE
        "#,
    )
    .bind(id.to_string())
    .bind(resource.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DbError::NotFound("access request"))?
    .try_into()
}

fn creator_id(creator: &Creator) -> Option<String> {
    match creator {
        Creator::User(user) => Some(user.to_string()),
        Creator::Guest(_) => None,
    }
}

// =============================================================================
// Store
// =============================================================================

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn membership(
        &self,
        resource: ResourceId,
        user: UserId,
    ) -> Result<Option<Membership>, DbError> {
        let mut conn = self.pool.acquire().await?;
        fetch_membership(&mut conn, resource, user, false).await
    }

    async fn list_memberships(&self, resource: ResourceId) -> Result<Vec<Membership>, DbError> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT membership_id, resource_id, user_id, role, status, created_at, updated_at
            FROM memberships
            WHERE resource_id = $1
            ORDER BY created_at, membership_id
            "#,
        )
        .bind(resource.to_string())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn add_membership(
        &self,
        resource: ResourceId,
        user: UserId,
        role: Role,
        status: MembershipStatus,
    ) -> Result<Membership, DbError> {
        let mut conn = self.pool.acquire().await?;
        insert_membership(&mut conn, resource, user, role, status).await
    }

    async fn accept_invitation(
        &self,
        resource: ResourceId,
        user: UserId,
    ) -> Result<Membership, DbError> {
        let mut conn = self.pool.acquire().await?;
        let accepted = sqlx::query_as::<_, MembershipRow>(
            r#"
            UPDATE memberships
            SET status = 'active', updated_at = now()
            WHERE resource_id = $1 AND user_id = $2 AND status = 'invited'
            RETURNING membership_id, resource_id, user_id, role, status, created_at, updated_at
            "#,
        )
        .bind(resource.to_string())
        .bind(user.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = accepted {
            return row.try_into();
        }

        match fetch_membership(&mut conn, resource, user, false).await? {
            Some(existing) if existing.status.is_active() => Ok(existing),
            _ => Err(DbError::NotFound("invitation")),
        }
    }

    async fn update_membership_role(
        &self,
        resource: ResourceId,
        user: UserId,
        role: Role,
    ) -> Result<Membership, DbError> {
        let mut tx = self.pool.begin().await?;

        let current = fetch_membership(&mut tx, resource, user, true)
            .await?
            .ok_or(DbError::NotFound("membership"))?;
        guard_last_owner(&mut tx, &current, Some(role)).await?;

        let updated: Membership = sqlx::query_as::<_, MembershipRow>(
            r#"
            UPDATE memberships
            SET role = $3, updated_at = now()
            WHERE resource_id = $1 AND user_id = $2
            RETURNING membership_id, resource_id, user_id, role, status, created_at, updated_at
            "#,
        )
        .bind(resource.to_string())
        .bind(user.to_string())
        .bind(role.as_str())
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn remove_membership(&self, resource: ResourceId, user: UserId) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let current = fetch_membership(&mut tx, resource, user, true)
            .await?
            .ok_or(DbError::NotFound("membership"))?;
        guard_last_owner(&mut tx, &current, None).await?;

        sqlx::query("DELETE FROM memberships WHERE resource_id = $1 AND user_id = $2")
            .bind(resource.to_string())
            .bind(user.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_trip(&self, trip: NewTrip, creator: Creator) -> Result<Trip, DbError> {
        let mut tx = self.pool.begin().await?;

        let record: Trip = sqlx::query_as::<_, TripRow>(
            r#"
            INSERT INTO trips (trip_id, name, description, destination, start_date, end_date, is_public, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING trip_id, name, description, destination, start_date, end_date,
                      is_public, created_by, created_at, updated_at
            "#,
        )
        .bind(TripId::new().to_string())
        .bind(&trip.name)
        .bind(&trip.description)
        .bind(&trip.destination)
        .bind(trip.start_date)
        .bind(trip.end_date)
        .bind(trip.is_public)
        .bind(creator_id(&creator))
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        register_creator(&mut tx, record.id.into(), &creator).await?;
        tx.commit().await?;

        info!(trip_id = %record.id, "Created trip");
        Ok(record)
    }

    async fn trip(&self, id: TripId) -> Result<Option<Trip>, DbError> {
        sqlx::query_as::<_, TripRow>(
            r#"
            SELECT trip_id, name, description, destination, start_date, end_date,
                   is_public, created_by, created_at, updated_at
            FROM trips
            WHERE trip_id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(Trip::try_from)
        .transpose()
    }

    async fn list_trips_for(&self, user: UserId) -> Result<Vec<Trip>, DbError> {
        let rows = sqlx::query_as::<_, TripRow>(
            r#"
            SELECT t.trip_id, t.name, t.description, t.destination, t.start_date, t.end_date,
                   t.is_public, t.created_by, t.created_at, t.updated_at
            FROM trips t
            JOIN memberships m ON m.resource_id = t.trip_id
            WHERE m.user_id = $1 AND m.status = 'active'
            ORDER BY t.created_at DESC
            "#,
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn update_trip(&self, id: TripId, patch: TripPatch) -> Result<Trip, DbError> {
        sqlx::query_as::<_, TripRow>(
            r#"
            UPDATE trips SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                destination = COALESCE($4, destination),
                start_date = COALESCE($5, start_date),
                end_date = COALESCE($6, end_date),
                is_public = COALESCE($7, is_public),
                updated_at = now()
            WHERE trip_id = $1
            RETURNING trip_id, name, description, destination, start_date, end_date,
                      is_public, created_by, created_at, updated_at
            "#,
        )
        .bind(id.to_string())
        .bind(patch.name)
        .bind(patch.description)
        .bind(patch.destination)
        .bind(patch.start_date)
        .bind(patch.end_date)
        .bind(patch.is_public)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound("trip"))?
        .try_into()
    }

    async fn delete_trip(&self, id: TripId) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        forget_resource(&mut tx, id.into()).await?;

        let deleted = sqlx::query("DELETE FROM trips WHERE trip_id = $1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(DbError::NotFound("trip"));
        }

        tx.commit().await?;
        info!(trip_id = %id, "Deleted trip");
        Ok(())
    }

    async fn create_group(&self, group: NewGroup, creator: Creator) -> Result<Group, DbError> {
        let mut tx = self.pool.begin().await?;

        let record: Group = sqlx::query_as::<_, GroupRow>(
            r#"
            INSERT INTO groups (group_id, name, description, emoji, visibility, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING group_id, name, description, emoji, visibility, created_by, created_at, updated_at
            "#,
        )
        .bind(GroupId::new().to_string())
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.emoji)
        .bind(group.visibility.as_str())
        .bind(creator_id(&creator))
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        register_creator(&mut tx, record.id.into(), &creator).await?;
        tx.commit().await?;

        info!(group_id = %record.id, "Created group");
        Ok(record)
    }

    async fn group(&self, id: GroupId) -> Result<Option<Group>, DbError> {
        sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT group_id, name, description, emoji, visibility, created_by, created_at, updated_at
            FROM groups
            WHERE group_id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(Group::try_from)
        .transpose()
    }

    async fn list_groups_for(&self, user: UserId) -> Result<Vec<Group>, DbError> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT g.group_id, g.name, g.description, g.emoji, g.visibility,
                   g.created_by, g.created_at, g.updated_at
            FROM groups g
            JOIN memberships m ON m.resource_id = g.group_id
            WHERE m.user_id = $1 AND m.status = 'active'
            ORDER BY g.created_at DESC
            "#,
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn update_group(&self, id: GroupId, patch: GroupPatch) -> Result<Group, DbError> {
        sqlx::query_as::<_, GroupRow>(
            r#"
            UPDATE groups SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                emoji = COALESCE($4, emoji),
                visibility = COALESCE($5, visibility),
                updated_at = now()
            WHERE group_id = $1
            RETURNING group_id, name, description, emoji, visibility, created_by, created_at, updated_at
            "#,
        )
        .bind(id.to_string())
        .bind(patch.name)
        .bind(patch.description)
        .bind(patch.emoji)
        .bind(patch.visibility.map(|v| v.as_str()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound("group"))?
        .try_into()
    }

    async fn delete_group(&self, id: GroupId) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        forget_resource(&mut tx, id.into()).await?;

        let deleted = sqlx::query("DELETE FROM groups WHERE group_id = $1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(DbError::NotFound("group"));
        }

        tx.commit().await?;
        info!(group_id = %id, "Deleted group");
        Ok(())
    }

    async fn list_notes(&self, trip: TripId) -> Result<Vec<Note>, DbError> {
        let rows = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT note_id, trip_id, title, content, position, created_by, updated_by,
                   created_at, updated_at
            FROM trip_notes
            WHERE trip_id = $1
            ORDER BY position
            "#,
        )
        .bind(trip.to_string())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn note(&self, trip: TripId, note: NoteId) -> Result<Option<Note>, DbError> {
        sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT note_id, trip_id, title, content, position, created_by, updated_by,
                   created_at, updated_at
            FROM trip_notes
            WHERE trip_id = $1 AND note_id = $2
            "#,
        )
        .bind(trip.to_string())
        .bind(note.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(Note::try_from)
        .transpose()
    }

    async fn create_note(
        &self,
        trip: TripId,
        note: NewNote,
        author: UserId,
    ) -> Result<Note, DbError> {
        let mut tx = self.pool.begin().await?;

        // Serializes position assignment per trip.
        let exists: Option<String> =
            sqlx::query_scalar("SELECT trip_id FROM trips WHERE trip_id = $1 FOR UPDATE")
                .bind(trip.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(DbError::NotFound("trip"));
        }

        let position: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM trip_notes WHERE trip_id = $1",
        )
        .bind(trip.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let record: Note = sqlx::query_as::<_, NoteRow>(
            r#"
            INSERT INTO trip_notes (note_id, trip_id, title, content, position, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING note_id, trip_id, title, content, position, created_by, updated_by,
                      created_at, updated_at
            "#,
        )
        .bind(NoteId::new().to_string())
        .bind(trip.to_string())
        .bind(&note.title)
        .bind(&note.content)
        .bind(position)
        .bind(author.to_string())
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;
        Ok(record)
    }

    async fn update_note(
        &self,
        trip: TripId,
        note: NoteId,
        patch: NotePatch,
        editor: UserId,
    ) -> Result<Note, DbError> {
        sqlx::query_as::<_, NoteRow>(
            r#"
            UPDATE trip_notes SET
                title = COALESCE($3, title),
                content = COALESCE($4, content),
                updated_by = $5,
                updated_at = now()
            WHERE trip_id = $1 AND note_id = $2
            RETURNING note_id, trip_id, title, content, position, created_by, updated_by,
                      created_at, updated_at
            "#,
        )
        .bind(trip.to_string())
        .bind(note.to_string())
        .bind(patch.title)
        .bind(patch.content)
        .bind(editor.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound("note"))?
        .try_into()
    }

    async fn delete_note(&self, trip: TripId, note: NoteId) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT trip_id FROM trips WHERE trip_id = $1 FOR UPDATE")
            .bind(trip.to_string())
            .execute(&mut *tx)
            .await?;

        let position: i32 = sqlx::query_scalar(
            "DELETE FROM trip_notes WHERE trip_id = $1 AND note_id = $2 RETURNING position",
        )
        .bind(trip.to_string())
        .bind(note.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound("note"))?;

        let shifted = sqlx::query(
            "UPDATE trip_notes SET position = position - 1 WHERE trip_id = $1 AND position > $2",
        )
        .bind(trip.to_string())
        .bind(position)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        debug!(trip_id = %trip, note_id = %note, shifted, "Deleted note");
        Ok(())
    }

    async fn create_access_request(
        &self,
        resource: ResourceId,
        requester: UserId,
        message: Option<String>,
    ) -> Result<AccessRequest, DbError> {
        let mut conn = self.pool.acquire().await?;

        if fetch_membership(&mut conn, resource, requester, false)
            .await?
            .is_some_and(|m| m.status.is_active())
        {
            return Err(DbError::Conflict(Conflict::AlreadyMember));
        }

        sqlx::query_as::<_, AccessRequestRow>(
            r#"
            INSERT INTO access_requests (request_id, resource_kind, resource_id, requester, message)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING request_id, resource_id, requester, message, status, resolved_role,
                      resolved_by, resolved_at, denial_reason, created_at
            "#,
        )
        .bind(AccessRequestId::new().to_string())
        .bind(resource.kind().as_str())
        .bind(resource.to_string())
        .bind(requester.to_string())
        .bind(message)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DbError::Conflict(Conflict::PendingRequestExists)
            } else {
                DbError::Query(e)
            }
        })?
        .try_into()
    }

    async fn access_request(
        &self,
        resource: ResourceId,
        id: AccessRequestId,
    ) -> Result<Option<AccessRequest>, DbError> {
        sqlx::query_as::<_, AccessRequestRow>(
            r#"
            SELECT request_id, resource_id, requester, message, status, resolved_role,
                   resolved_by, resolved_at, denial_reason, created_at
            FROM access_requests
            WHERE request_id = $1 AND resource_id = $2
            "#,
        )
        .bind(id.to_string())
        .bind(resource.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(AccessRequest::try_from)
        .transpose()
    }

    async fn list_access_requests(
        &self,
        resource: ResourceId,
        status: Option<AccessRequestStatus>,
    ) -> Result<Vec<AccessRequest>, DbError> {
        let rows = sqlx::query_as::<_, AccessRequestRow>(
            r#"
            SELECT request_id, resource_id, requester, message, status, resolved_role,
                   resolved_by, resolved_at, denial_reason, created_at
            FROM access_requests
            WHERE resource_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at, request_id
            "#,
        )
        .bind(resource.to_string())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn approve_access_request(
        &self,
        resource: ResourceId,
        id: AccessRequestId,
        role: Role,
        approver: UserId,
    ) -> Result<Approval, DbError> {
        let mut tx = self.pool.begin().await?;

        let current = lock_access_request(&mut tx, resource, id).await?;
        let status = current
            .status
            .resolve(AccessRequestStatus::Approved)
            .map_err(|_| DbError::Conflict(Conflict::AlreadyResolved(current.status)))?;

        // An active member is raised to `role`, never lowered.
        let granted = match fetch_membership(&mut tx, resource, current.requester, true).await? {
            Some(existing) if existing.status.is_active() => existing.role.max(role),
            _ => role,
        };

        let membership: Membership = sqlx::query_as::<_, MembershipRow>(
            r#"
            INSERT INTO memberships (membership_id, resource_kind, resource_id, user_id, role, status)
            VALUES ($1, $2, $3, $4, $5, 'active')
            ON CONFLICT (resource_id, user_id) DO UPDATE SET
                updated_at = CASE
                    WHEN memberships.status = 'active' AND memberships.role = EXCLUDED.role
                    THEN memberships.updated_at ELSE now() END,
                role = EXCLUDED.role,
                status = 'active'
            RETURNING membership_id, resource_id, user_id, role, status, created_at, updated_at
            "#,
        )
        .bind(MembershipId::new().to_string())
        .bind(resource.kind().as_str())
        .bind(resource.to_string())
        .bind(current.requester.to_string())
        .bind(granted.as_str())
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        let request: AccessRequest = sqlx::query_as::<_, AccessRequestRow>(
            r#"
            UPDATE access_requests
            SET status = $2, resolved_role = $3, resolved_by = $4, resolved_at = now()
            WHERE request_id = $1
            RETURNING request_id, resource_id, requester, message, status, resolved_role,
                      resolved_by, resolved_at, denial_reason, created_at
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(membership.role.as_str())
        .bind(approver.to_string())
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;
        info!(
            request_id = %id,
            resource_id = %resource,
            user_id = %request.requester,
            role = %membership.role,
            "Approved access request"
        );

        Ok(Approval {
            request,
            membership,
        })
    }

    async fn deny_access_request(
        &self,
        resource: ResourceId,
        id: AccessRequestId,
        reason: Option<String>,
        approver: UserId,
    ) -> Result<AccessRequest, DbError> {
        let mut tx = self.pool.begin().await?;

        let current = lock_access_request(&mut tx, resource, id).await?;
        let status = current
            .status
            .resolve(AccessRequestStatus::Denied)
            .map_err(|_| DbError::Conflict(Conflict::AlreadyResolved(current.status)))?;

        let request: AccessRequest = sqlx::query_as::<_, AccessRequestRow>(
            r#"
            UPDATE access_requests
            SET status = $2, denial_reason = $3, resolved_by = $4, resolved_at = now()
            WHERE request_id = $1
            RETURNING request_id, resource_id, requester, message, status, resolved_role,
                      resolved_by, resolved_at, denial_reason, created_at
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(reason)
        .bind(approver.to_string())
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;
        Ok(request)
    }

    async fn guest_token_usable(&self, token: &GuestTokenHash) -> Result<bool, DbError> {
        let claimed_by: Option<Option<String>> =
            sqlx::query_scalar("SELECT claimed_by FROM guest_tokens WHERE token_hash = $1")
                .bind(token.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(claimed_by.flatten().is_none())
    }

    async fn add_guest_membership(
        &self,
        token: &GuestTokenHash,
        resource: ResourceId,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        add_guest(&mut tx, token, resource).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn guest_memberships(
        &self,
        token: &GuestTokenHash,
    ) -> Result<Vec<GuestMembership>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT resource_id, created_at FROM guest_memberships
            WHERE token_hash = $1
            ORDER BY created_at, resource_id
            "#,
        )
        .bind(token.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<GuestMembership, DbError> {
                let resource_id: String = row.try_get("resource_id")?;
                Ok(GuestMembership {
                    resource_id: decode("resource_id", &resource_id)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn claim_guest_memberships(
        &self,
        token: &GuestTokenHash,
        user: UserId,
    ) -> Result<ClaimOutcome, DbError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = ClaimOutcome::default();

        let claimed_by: Option<Option<String>> = sqlx::query_scalar(
            "SELECT claimed_by FROM guest_tokens WHERE token_hash = $1 FOR UPDATE",
        )
        .bind(token.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        match claimed_by {
            None => return Ok(outcome),
            Some(Some(_)) => {
                outcome.already_claimed = true;
                return Ok(outcome);
            }
            Some(None) => {}
        }

        let resources: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT resource_id FROM guest_memberships
            WHERE token_hash = $1
            ORDER BY created_at, resource_id
            "#,
        )
        .bind(token.as_str())
        .fetch_all(&mut *tx)
        .await?;

        for raw in resources {
            let resource: ResourceId = decode("resource_id", &raw)?;
            let converted: Option<String> = sqlx::query_scalar(
                r#"
                INSERT INTO memberships (membership_id, resource_kind, resource_id, user_id, role, status)
                VALUES ($1, $2, $3, $4, $5, 'active')
                ON CONFLICT (resource_id, user_id) DO UPDATE
                    SET status = 'active', updated_at = now()
                    WHERE memberships.status <> 'active'
                RETURNING membership_id
                "#,
            )
            .bind(MembershipId::new().to_string())
            .bind(resource.kind().as_str())
            .bind(&raw)
            .bind(user.to_string())
            .bind(resource.kind().claim_role().as_str())
            .fetch_optional(&mut *tx)
            .await?;

            match converted {
                Some(_) => outcome.claimed.push(resource),
                None => outcome.skipped.push(resource),
            }
        }

        sqlx::query("DELETE FROM guest_memberships WHERE token_hash = $1")
            .bind(token.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE guest_tokens SET claimed_by = $2, claimed_at = now() WHERE token_hash = $1",
        )
        .bind(token.as_str())
        .bind(user.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            user_id = %user,
            claimed = outcome.claimed.len(),
            skipped = outcome.skipped.len(),
            "Claimed guest memberships"
        );
        Ok(outcome)
    }
}
