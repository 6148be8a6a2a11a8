//! In-process [`Store`] for tests and `WITHME_STORE=memory` runs.
//!
//! All state sits behind one mutex, so every operation is atomic with
//! respect to every other one. The lock is never held across an await.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use withme_id::{AccessRequestId, GroupId, MembershipId, NoteId, TripId, UserId};
use withme_model::{
    AccessRequest, AccessRequestStatus, Group, GuestMembership, Membership, MembershipStatus,
    Note, ResourceId, Role, Trip,
};

use super::{
    Approval, ClaimOutcome, Conflict, Creator, DbError, GroupPatch, NewGroup, NewNote, NewTrip,
    NotePatch, Store, TripPatch,
};
use crate::guest::GuestTokenHash;

#[derive(Default)]
struct Inner {
    trips: HashMap<TripId, Trip>,
    groups: HashMap<GroupId, Group>,
    memberships: BTreeMap<(ResourceId, UserId), Membership>,
    /// Per trip, kept sorted by position.
    notes: HashMap<TripId, Vec<Note>>,
    requests: BTreeMap<AccessRequestId, AccessRequest>,
    /// Token hash -> user that claimed it.
    guest_tokens: HashMap<GuestTokenHash, Option<UserId>>,
    guest_memberships: HashMap<GuestTokenHash, Vec<GuestMembership>>,
}

impl Inner {
    fn insert_membership(
        &mut self,
        resource: ResourceId,
        user: UserId,
        role: Role,
        status: MembershipStatus,
    ) -> Result<Membership, DbError> {
        if self.memberships.contains_key(&(resource, user)) {
            return Err(DbError::Conflict(Conflict::AlreadyMember));
        }
        let now = Utc::now();
        let membership = Membership {
            id: MembershipId::new(),
            resource_id: resource,
            user_id: user,
            role,
            status,
            created_at: now,
            updated_at: now,
        };
        self.memberships.insert((resource, user), membership.clone());
        Ok(membership)
    }

    fn add_guest(&mut self, token: &GuestTokenHash, resource: ResourceId) {
        self.guest_tokens.entry(token.clone()).or_insert(None);
        let rows = self.guest_memberships.entry(token.clone()).or_default();
        if !rows.iter().any(|g| g.resource_id == resource) {
            rows.push(GuestMembership {
                resource_id: resource,
                created_at: Utc::now(),
            });
        }
    }

    fn register_creator(&mut self, resource: ResourceId, creator: &Creator) -> Result<(), DbError> {
        match creator {
            Creator::User(user) => {
                let role = resource.kind().creator_role();
                self.insert_membership(resource, *user, role, MembershipStatus::Active)?;
            }
            Creator::Guest(token) => self.add_guest(token, resource),
        }
        Ok(())
    }

    /// Refuse a change that would leave `resource` without an active creator-role member.
    fn guard_last_owner(&self, current: &Membership, new_role: Option<Role>) -> Result<(), DbError> {
        let top = current.resource_id.kind().creator_role();
        if current.role != top || !current.status.is_active() || new_role == Some(top) {
            return Ok(());
        }
        let holders = self
            .memberships
            .values()
            .filter(|m| m.resource_id == current.resource_id && m.role == top && m.status.is_active())
            .count();
        if holders <= 1 {
            return Err(DbError::Conflict(Conflict::LastOwner));
        }
        Ok(())
    }

    fn forget_resource(&mut self, resource: ResourceId) {
        self.memberships.retain(|(r, _), _| *r != resource);
        self.requests.retain(|_, req| req.resource_id != resource);
        for rows in self.guest_memberships.values_mut() {
            rows.retain(|g| g.resource_id != resource);
        }
    }

    fn request_mut(
        &mut self,
        resource: ResourceId,
        id: AccessRequestId,
    ) -> Result<&mut AccessRequest, DbError> {
        self.requests
            .get_mut(&id)
            .filter(|req| req.resource_id == resource)
            .ok_or(DbError::NotFound("access request"))
    }
}

/// Mutex-guarded store living entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), DbError> {
        self.lock().map(|_| ())
    }

    async fn membership(
        &self,
        resource: ResourceId,
        user: UserId,
    ) -> Result<Option<Membership>, DbError> {
        Ok(self.lock()?.memberships.get(&(resource, user)).cloned())
    }

    async fn list_memberships(&self, resource: ResourceId) -> Result<Vec<Membership>, DbError> {
        let inner = self.lock()?;
        let mut members: Vec<Membership> = inner
            .memberships
            .values()
            .filter(|m| m.resource_id == resource)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.created_at);
        Ok(members)
    }

    async fn add_membership(
        &self,
        resource: ResourceId,
        user: UserId,
        role: Role,
        status: MembershipStatus,
    ) -> Result<Membership, DbError> {
        self.lock()?.insert_membership(resource, user, role, status)
    }

    async fn accept_invitation(
        &self,
        resource: ResourceId,
        user: UserId,
    ) -> Result<Membership, DbError> {
        let mut inner = self.lock()?;
        let membership = inner
            .memberships
            .get_mut(&(resource, user))
            .ok_or(DbError::NotFound("invitation"))?;
        match membership.status {
            MembershipStatus::Active => {}
            MembershipStatus::Invited => {
                membership.status = MembershipStatus::Active;
                membership.updated_at = Utc::now();
            }
            MembershipStatus::Pending => return Err(DbError::NotFound("invitation")),
        }
        Ok(membership.clone())
    }

    async fn update_membership_role(
        &self,
        resource: ResourceId,
        user: UserId,
        role: Role,
    ) -> Result<Membership, DbError> {
        let mut inner = self.lock()?;
        let current = inner
            .memberships
            .get(&(resource, user))
            .cloned()
            .ok_or(DbError::NotFound("membership"))?;
        inner.guard_last_owner(&current, Some(role))?;

        let membership = inner
            .memberships
            .get_mut(&(resource, user))
            .ok_or(DbError::NotFound("membership"))?;
        membership.role = role;
        membership.updated_at = Utc::now();
        Ok(membership.clone())
    }

    async fn remove_membership(&self, resource: ResourceId, user: UserId) -> Result<(), DbError> {
        let mut inner = self.lock()?;
        let current = inner
            .memberships
            .get(&(resource, user))
            .cloned()
            .ok_or(DbError::NotFound("membership"))?;
        inner.guard_last_owner(&current, None)?;
        inner.memberships.remove(&(resource, user));
        Ok(())
    }

    async fn create_trip(&self, trip: NewTrip, creator: Creator) -> Result<Trip, DbError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let record = Trip {
            id: TripId::new(),
            name: trip.name,
            description: trip.description,
            destination: trip.destination,
            start_date: trip.start_date,
            end_date: trip.end_date,
            is_public: trip.is_public,
            created_by: match &creator {
                Creator::User(user) => Some(*user),
                Creator::Guest(_) => None,
            },
            created_at: now,
            updated_at: now,
        };
        inner.register_creator(record.id.into(), &creator)?;
        inner.trips.insert(record.id, record.clone());
        debug!(trip_id = %record.id, "Created trip");
        Ok(record)
    }

    async fn trip(&self, id: TripId) -> Result<Option<Trip>, DbError> {
        Ok(self.lock()?.trips.get(&id).cloned())
    }

    async fn list_trips_for(&self, user: UserId) -> Result<Vec<Trip>, DbError> {
        let inner = self.lock()?;
        let mut trips: Vec<Trip> = inner
            .memberships
            .values()
            .filter(|m| m.user_id == user && m.status.is_active())
            .filter_map(|m| match m.resource_id {
                ResourceId::Trip(id) => inner.trips.get(&id).cloned(),
                ResourceId::Group(_) => None,
            })
            .collect();
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trips)
    }

    async fn update_trip(&self, id: TripId, patch: TripPatch) -> Result<Trip, DbError> {
        let mut inner = self.lock()?;
        let trip = inner.trips.get_mut(&id).ok_or(DbError::NotFound("trip"))?;
        if let Some(name) = patch.name {
            trip.name = name;
        }
        if patch.description.is_some() {
            trip.description = patch.description;
        }
        if patch.destination.is_some() {
            trip.destination = patch.destination;
        }
        if patch.start_date.is_some() {
            trip.start_date = patch.start_date;
        }
        if patch.end_date.is_some() {
            trip.end_date = patch.end_date;
        }
        if let Some(is_public) = patch.is_public {
            trip.is_public = is_public;
        }
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }

    async fn delete_trip(&self, id: TripId) -> Result<(), DbError> {
        let mut inner = self.lock()?;
        inner.trips.remove(&id).ok_or(DbError::NotFound("trip"))?;
        inner.notes.remove(&id);
        inner.forget_resource(id.into());
        Ok(())
    }

    async fn create_group(&self, group: NewGroup, creator: Creator) -> Result<Group, DbError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let record = Group {
            id: GroupId::new(),
            name: group.name,
            description: group.description,
            emoji: group.emoji,
            visibility: group.visibility,
            created_by: match &creator {
                Creator::User(user) => Some(*user),
                Creator::Guest(_) => None,
            },
            created_at: now,
            updated_at: now,
        };
        inner.register_creator(record.id.into(), &creator)?;
        inner.groups.insert(record.id, record.clone());
        debug!(group_id = %record.id, "Created group");
        Ok(record)
    }

    async fn group(&self, id: GroupId) -> Result<Option<Group>, DbError> {
        Ok(self.lock()?.groups.get(&id).cloned())
    }

    async fn list_groups_for(&self, user: UserId) -> Result<Vec<Group>, DbError> {
        let inner = self.lock()?;
        let mut groups: Vec<Group> = inner
            .memberships
            .values()
            .filter(|m| m.user_id == user && m.status.is_active())
            .filter_map(|m| match m.resource_id {
                ResourceId::Group(id) => inner.groups.get(&id).cloned(),
                ResourceId::Trip(_) => None,
            })
            .collect();
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(groups)
    }

    async fn update_group(&self, id: GroupId, patch: GroupPatch) -> Result<Group, DbError> {
        let mut inner = self.lock()?;
        let group = inner.groups.get_mut(&id).ok_or(DbError::NotFound("group"))?;
        if let Some(name) = patch.name {
            group.name = name;
        }
        if patch.description.is_some() {
            group.description = patch.description;
        }
        if patch.emoji.is_some() {
            group.emoji = patch.emoji;
        }
        if let Some(visibility) = patch.visibility {
            group.visibility = visibility;
        }
        group.updated_at = Utc::now();
        Ok(group.clone())
    }

    async fn delete_group(&self, id: GroupId) -> Result<(), DbError> {
        let mut inner = self.lock()?;
        inner.groups.remove(&id).ok_or(DbError::NotFound("group"))?;
        inner.forget_resource(id.into());
        Ok(())
    }

    async fn list_notes(&self, trip: TripId) -> Result<Vec<Note>, DbError> {
        Ok(self.lock()?.notes.get(&trip).cloned().unwrap_or_default())
    }

    async fn note(&self, trip: TripId, note: NoteId) -> Result<Option<Note>, DbError> {
        let inner = self.lock()?;
        Ok(inner
            .notes
            .get(&trip)
            .and_then(|notes| notes.iter().find(|n| n.id == note))
            .cloned())
    }

    async fn create_note(
        &self,
        trip: TripId,
        note: NewNote,
        author: UserId,
    ) -> Result<Note, DbError> {
        let mut inner = self.lock()?;
        if !inner.trips.contains_key(&trip) {
            return Err(DbError::NotFound("trip"));
        }
        let notes = inner.notes.entry(trip).or_default();
        let now = Utc::now();
        let record = Note {
            id: NoteId::new(),
            trip_id: trip,
            title: note.title,
            content: note.content,
            position: i32::try_from(notes.len())
                .map_err(|_| DbError::Corrupt("note position overflow".to_string()))?,
            created_by: Some(author),
            updated_by: Some(author),
            created_at: now,
            updated_at: now,
        };
        notes.push(record.clone());
        Ok(record)
    }

    async fn update_note(
        &self,
        trip: TripId,
        note: NoteId,
        patch: NotePatch,
        editor: UserId,
    ) -> Result<Note, DbError> {
        let mut inner = self.lock()?;
        let record = inner
            .notes
            .get_mut(&trip)
            .and_then(|notes| notes.iter_mut().find(|n| n.id == note))
            .ok_or(DbError::NotFound("note"))?;
        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(content) = patch.content {
            record.content = content;
        }
        record.updated_by = Some(editor);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete_note(&self, trip: TripId, note: NoteId) -> Result<(), DbError> {
        let mut inner = self.lock()?;
        let notes = inner.notes.get_mut(&trip).ok_or(DbError::NotFound("note"))?;
        let index = notes
            .iter()
            .position(|n| n.id == note)
            .ok_or(DbError::NotFound("note"))?;
        notes.remove(index);
        for (position, sibling) in notes.iter_mut().enumerate().skip(index) {
            sibling.position = i32::try_from(position)
                .map_err(|_| DbError::Corrupt("note position overflow".to_string()))?;
        }
        Ok(())
    }

    async fn create_access_request(
        &self,
        resource: ResourceId,
        requester: UserId,
        message: Option<String>,
    ) -> Result<AccessRequest, DbError> {
        let mut inner = self.lock()?;
        if inner
            .memberships
            .get(&(resource, requester))
            .is_some_and(|m| m.status.is_active())
        {
            return Err(DbError::Conflict(Conflict::AlreadyMember));
        }
        if inner.requests.values().any(|req| {
            req.resource_id == resource
                && req.requester == requester
                && req.status == AccessRequestStatus::Pending
        }) {
            return Err(DbError::Conflict(Conflict::PendingRequestExists));
        }

        let request = AccessRequest {
            id: AccessRequestId::new(),
            resource_id: resource,
            requester,
            message,
            status: AccessRequestStatus::Pending,
            resolved_role: None,
            resolved_by: None,
            resolved_at: None,
            denial_reason: None,
            created_at: Utc::now(),
        };
        inner.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn access_request(
        &self,
        resource: ResourceId,
        id: AccessRequestId,
    ) -> Result<Option<AccessRequest>, DbError> {
        Ok(self
            .lock()?
            .requests
            .get(&id)
            .filter(|req| req.resource_id == resource)
            .cloned())
    }

    async fn list_access_requests(
        &self,
        resource: ResourceId,
        status: Option<AccessRequestStatus>,
    ) -> Result<Vec<AccessRequest>, DbError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|req| req.resource_id == resource)
            .filter(|req| status.is_none_or(|s| req.status == s))
            .cloned()
            .collect())
    }

    async fn approve_access_request(
        &self,
        resource: ResourceId,
        id: AccessRequestId,
        role: Role,
        approver: UserId,
    ) -> Result<Approval, DbError> {
        let mut inner = self.lock()?;
        let now = Utc::now();

        let request = inner.request_mut(resource, id)?;
        let status = request.status;
        request.status = status
            .resolve(AccessRequestStatus::Approved)
            .map_err(|_| DbError::Conflict(Conflict::AlreadyResolved(status)))?;
        request.resolved_by = Some(approver);
        request.resolved_at = Some(now);
        let requester = request.requester;

        // An active member is raised to `role`, never lowered.
        let key = (resource, requester);
        let membership = match inner.memberships.get_mut(&key) {
            Some(existing) => {
                let granted = if existing.status.is_active() {
                    existing.role.max(role)
                } else {
                    role
                };
                if granted != existing.role || !existing.status.is_active() {
                    existing.role = granted;
                    existing.status = MembershipStatus::Active;
                    existing.updated_at = now;
                }
                existing.clone()
            }
            None => inner.insert_membership(resource, requester, role, MembershipStatus::Active)?,
        };

        let request = inner.request_mut(resource, id)?;
        request.resolved_role = Some(membership.role);
        let request = request.clone();

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
        let mut inner = self.lock()?;
        let request = inner.request_mut(resource, id)?;
        let status = request.status;
        request.status = status
            .resolve(AccessRequestStatus::Denied)
            .map_err(|_| DbError::Conflict(Conflict::AlreadyResolved(status)))?;
        request.denial_reason = reason;
        request.resolved_by = Some(approver);
        request.resolved_at = Some(Utc::now());
        Ok(request.clone())
    }

    async fn guest_token_usable(&self, token: &GuestTokenHash) -> Result<bool, DbError> {
        Ok(self
            .lock()?
            .guest_tokens
            .get(token)
            .is_none_or(|claimed_by| claimed_by.is_none()))
    }

    async fn add_guest_membership(
        &self,
        token: &GuestTokenHash,
        resource: ResourceId,
    ) -> Result<(), DbError> {
        self.lock()?.add_guest(token, resource);
        Ok(())
    }

    async fn guest_memberships(
        &self,
        token: &GuestTokenHash,
    ) -> Result<Vec<GuestMembership>, DbError> {
        Ok(self
            .lock()?
            .guest_memberships
            .get(token)
            .cloned()
            .unwrap_or_default())
    }

    async fn claim_guest_memberships(
        &self,
        token: &GuestTokenHash,
        user: UserId,
    ) -> Result<ClaimOutcome, DbError> {
        let mut inner = self.lock()?;
        let mut outcome = ClaimOutcome::default();

        match inner.guest_tokens.get(token) {
            None => return Ok(outcome),
            Some(Some(_)) => {
                outcome.already_claimed = true;
                return Ok(outcome);
            }
            Some(None) => {}
        }

        let rows = inner.guest_memberships.remove(token).unwrap_or_default();
        let now = Utc::now();
        for row in rows {
            let resource = row.resource_id;
            match inner.memberships.get_mut(&(resource, user)) {
                Some(existing) if existing.status.is_active() => outcome.skipped.push(resource),
                Some(existing) => {
                    existing.status = MembershipStatus::Active;
                    existing.updated_at = now;
                    outcome.claimed.push(resource);
                }
                None => {
                    let role = resource.kind().claim_role();
                    inner.insert_membership(resource, user, role, MembershipStatus::Active)?;
                    outcome.claimed.push(resource);
                }
            }
        }
        inner.guest_tokens.insert(token.clone(), Some(user));

        Ok(outcome)
    }
}
