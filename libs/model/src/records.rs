//! Records returned by the store.
//!
//! These are also the JSON shapes the API returns, so field names are part
//! of the wire contract.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use withme_id::{AccessRequestId, GroupId, MembershipId, NoteId, TripId, UserId};

use crate::{AccessRequestStatus, GroupVisibility, MembershipStatus, ResourceId, Role};

// -----------------------------------------------------------------------------
// Memberships
// -----------------------------------------------------------------------------

/// One user's role on one trip or group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Membership {
    pub id: MembershipId,
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub role: Role,
    pub status: MembershipStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    /// Whether this membership grants any of `roles`.
    pub fn grants(&self, roles: &[Role]) -> bool {
        self.status.is_active() && roles.contains(&self.role)
    }
}

/// An anonymous guest's provisional membership.
///
/// The guest token itself never leaves the store; only the resource is
/// reported back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestMembership {
    pub resource_id: ResourceId,
    pub created_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// Access Requests
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessRequest {
    pub id: AccessRequestId,
    pub resource_id: ResourceId,
    pub requester: UserId,
    pub message: Option<String>,
    pub status: AccessRequestStatus,
    pub resolved_role: Option<Role>,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub denial_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// Trips, Groups, Notes
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    pub id: TripId,
    pub name: String,
    pub description: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_public: bool,
    /// Absent for trips created by a guest.
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub emoji: Option<String>,
    pub visibility: GroupVisibility,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub id: NoteId,
    pub trip_id: TripId,
    pub title: String,
    pub content: String,
    /// Dense, zero-based position among the trip's notes.
    pub position: i32,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
