//! Authorization oracle.
//!
//! Answers "does this user hold one of these roles on this resource" from
//! the store on every call. A failed lookup is an [`OracleError`], never a
//! quiet `false`, so callers can tell 403 from 500.

use thiserror::Error;
use tracing::debug;
use withme_id::UserId;
use withme_model::{ResourceId, Role};

use crate::db::{DbError, Store};
use crate::policy::{allowed_roles, Action};

#[derive(Debug, Error)]
pub enum OracleError {
    /// The role set was empty or named a role the resource kind cannot hold.
    #[error("invalid authorization query: {0}")]
    InvalidQuery(String),

    #[error("membership lookup failed: {0}")]
    Unavailable(#[source] DbError),
}

/// Membership-backed authorization checks.
#[derive(Clone, Copy)]
pub struct Oracle<'a> {
    store: &'a dyn Store,
}

impl<'a> Oracle<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// True iff `user` has an active membership on `resource` whose role is in `allowed`.
    pub async fn is_authorized(
        &self,
        resource: ResourceId,
        user: UserId,
        allowed: &[Role],
    ) -> Result<bool, OracleError> {
        let kind = resource.kind();
        if allowed.is_empty() {
            return Err(OracleError::InvalidQuery(format!(
                "empty role set for {kind} {resource}"
            )));
        }
        if let Some(role) = allowed.iter().find(|r| !r.is_valid_for(kind)) {
            return Err(OracleError::InvalidQuery(format!(
                "role {role} does not exist on a {kind}"
            )));
        }

        let membership = self
            .store
            .membership(resource, user)
            .await
            .map_err(OracleError::Unavailable)?;

        let authorized = membership.is_some_and(|m| m.grants(allowed));
        debug!(resource_id = %resource, user_id = %user, authorized, "Authorization check");
        Ok(authorized)
    }

    /// True iff `user` has an active membership on `resource` at any role.
    pub async fn is_member(&self, resource: ResourceId, user: UserId) -> Result<bool, OracleError> {
        self.is_authorized(resource, user, resource.kind().roles())
            .await
    }

    /// The caller's active role, if any.
    pub async fn role_of(
        &self,
        resource: ResourceId,
        user: UserId,
    ) -> Result<Option<Role>, OracleError> {
        let membership = self
            .store
            .membership(resource, user)
            .await
            .map_err(OracleError::Unavailable)?;
        Ok(membership.filter(|m| m.status.is_active()).map(|m| m.role))
    }

    /// Policy-table check for `action`.
    pub async fn check(
        &self,
        resource: ResourceId,
        user: UserId,
        action: Action,
    ) -> Result<bool, OracleError> {
        self.is_authorized(resource, user, allowed_roles(action, resource.kind()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Creator, MemoryStore, NewTrip};
    use withme_id::TripId;
    use withme_model::MembershipStatus;

    async fn setup() -> (MemoryStore, ResourceId, UserId) {
        let store = MemoryStore::new();
        let admin = UserId::new();
        let trip = store
            .create_trip(
                NewTrip {
                    name: "Porto".to_string(),
                    ..Default::default()
                },
                Creator::User(admin),
            )
            .await
            .unwrap();
        (store, trip.id.into(), admin)
    }

    #[tokio::test]
    async fn test_active_membership_with_listed_role_authorizes() {
        let (store, trip, admin) = setup().await;
        let oracle = Oracle::new(&store);

        assert!(oracle.is_authorized(trip, admin, &[Role::Admin]).await.unwrap());
        assert!(!oracle.is_authorized(trip, admin, &[Role::Editor]).await.unwrap());
        assert!(!oracle
            .is_authorized(trip, UserId::new(), &[Role::Admin])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invited_membership_never_authorizes() {
        let (store, trip, _) = setup().await;
        let invitee = UserId::new();
        store
            .add_membership(trip, invitee, Role::Editor, MembershipStatus::Invited)
            .await
            .unwrap();

        let oracle = Oracle::new(&store);
        assert!(!oracle.is_member(trip, invitee).await.unwrap());

        store.accept_invitation(trip, invitee).await.unwrap();
        assert!(oracle.check(trip, invitee, Action::EditNote).await.unwrap());
    }

    #[tokio::test]
    async fn test_role_change_is_seen_on_next_call() {
        let (store, trip, _) = setup().await;
        let user = UserId::new();
        store
            .add_membership(trip, user, Role::Viewer, MembershipStatus::Active)
            .await
            .unwrap();

        let oracle = Oracle::new(&store);
        assert!(!oracle.check(trip, user, Action::EditNote).await.unwrap());
        store
            .update_membership_role(trip, user, Role::Editor)
            .await
            .unwrap();
        assert!(oracle.check(trip, user, Action::EditNote).await.unwrap());
        assert_eq!(oracle.role_of(trip, user).await.unwrap(), Some(Role::Editor));
    }

    #[tokio::test]
    async fn test_invalid_role_sets_are_errors() {
        let (store, trip, admin) = setup().await;
        let oracle = Oracle::new(&store);

        assert!(matches!(
            oracle.is_authorized(trip, admin, &[]).await,
            Err(OracleError::InvalidQuery(_))
        ));
        assert!(matches!(
            oracle.is_authorized(trip, admin, &[Role::Owner]).await,
            Err(OracleError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable_not_false() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let oracle = Oracle::new(&store);

        let result = oracle
            .is_authorized(TripId::new().into(), UserId::new(), &[Role::Viewer])
            .await;
        assert!(matches!(result, Err(OracleError::Unavailable(_))));
    }
}
