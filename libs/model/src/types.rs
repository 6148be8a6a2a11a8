//! Enumerations shared by trips and groups.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use withme_id::{GroupId, TripId};

use crate::ModelError;

// =============================================================================
// Resources
// =============================================================================

/// The kind of resource a membership points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Trip,
    Group,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Trip => "trip",
            ResourceKind::Group => "group",
        }
    }

    /// Roles that may appear on a membership of this kind, lowest first.
    pub fn roles(&self) -> &'static [Role] {
        match self {
            ResourceKind::Trip => &[Role::Viewer, Role::Contributor, Role::Editor, Role::Admin],
            ResourceKind::Group => &[
                Role::Viewer,
                Role::Contributor,
                Role::Editor,
                Role::Admin,
                Role::Owner,
            ],
        }
    }

    /// Role given to whoever creates the resource.
    pub fn creator_role(&self) -> Role {
        match self {
            ResourceKind::Trip => Role::Admin,
            ResourceKind::Group => Role::Owner,
        }
    }

    /// Role a claimed guest membership turns into: the lowest non-viewer role.
    pub fn claim_role(&self) -> Role {
        Role::Contributor
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Id of a trip or a group.
///
/// Rendered as the inner id, whose prefix identifies the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceId {
    Trip(TripId),
    Group(GroupId),
}

impl ResourceId {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceId::Trip(_) => ResourceKind::Trip,
            ResourceId::Group(_) => ResourceKind::Group,
        }
    }
}

impl From<TripId> for ResourceId {
    fn from(id: TripId) -> Self {
        ResourceId::Trip(id)
    }
}

impl From<GroupId> for ResourceId {
    fn from(id: GroupId) -> Self {
        ResourceId::Group(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Trip(id) => id.fmt(f),
            ResourceId::Group(id) => id.fmt(f),
        }
    }
}

impl FromStr for ResourceId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = TripId::parse(s) {
            return Ok(ResourceId::Trip(id));
        }
        GroupId::parse(s)
            .map(ResourceId::Group)
            .map_err(|_| ModelError::InvalidResourceId(s.to_string()))
    }
}

impl Serialize for ResourceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Roles
// =============================================================================

/// Membership role. Declaration order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Contributor,
    Editor,
    Admin,
    /// Group super-admin.
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Contributor => "contributor",
            Role::Editor => "editor",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }

    pub fn is_valid_for(&self, kind: ResourceKind) -> bool {
        kind.roles().contains(self)
    }

    /// Parses a role and checks it against the resource kind in one step.
    pub fn parse_for(s: &str, kind: ResourceKind) -> Result<Self, ModelError> {
        let role: Role = s.parse()?;
        if !role.is_valid_for(kind) {
            return Err(ModelError::RoleNotAllowed {
                role: role.as_str().to_string(),
                kind: kind.as_str(),
            });
        }
        Ok(role)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "contributor" => Ok(Role::Contributor),
            "editor" => Ok(Role::Editor),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(ModelError::UnknownRole(other.to_string())),
        }
    }
}

// =============================================================================
// Status Enums
// =============================================================================

/// Membership status. Only `active` memberships authorize anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Pending,
    Invited,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Pending => "pending",
            MembershipStatus::Invited => "invited",
        }
    }

    pub fn is_active(&self) -> bool {
        *self == MembershipStatus::Active
    }
}

impl FromStr for MembershipStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "pending" => Ok(MembershipStatus::Pending),
            "invited" => Ok(MembershipStatus::Invited),
            other => Err(ModelError::UnknownMembershipStatus(other.to_string())),
        }
    }
}

/// Access request state. `approved` and `denied` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestStatus {
    Pending,
    Approved,
    Denied,
}

impl AccessRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRequestStatus::Pending => "pending",
            AccessRequestStatus::Approved => "approved",
            AccessRequestStatus::Denied => "denied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AccessRequestStatus::Pending)
    }

    /// Moves a pending request to `to`.
    ///
    /// Fails with [`ModelError::AlreadyResolved`] once the request is terminal,
    /// which is how a second concurrent approval is detected.
    pub fn resolve(self, to: AccessRequestStatus) -> Result<AccessRequestStatus, ModelError> {
        if self.is_terminal() {
            return Err(ModelError::AlreadyResolved(self.as_str()));
        }
        Ok(to)
    }
}

impl FromStr for AccessRequestStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AccessRequestStatus::Pending),
            "approved" => Ok(AccessRequestStatus::Approved),
            "denied" => Ok(AccessRequestStatus::Denied),
            other => Err(ModelError::UnknownRequestStatus(other.to_string())),
        }
    }
}

/// Who can see and join a group without an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupVisibility {
    #[default]
    Private,
    Public,
}

impl GroupVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupVisibility::Private => "private",
            GroupVisibility::Public => "public",
        }
    }
}

impl FromStr for GroupVisibility {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(GroupVisibility::Private),
            "public" => Ok(GroupVisibility::Public),
            other => Err(ModelError::UnknownVisibility(other.to_string())),
        }
    }
}
