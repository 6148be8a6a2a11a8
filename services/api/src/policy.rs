//! Which roles may perform which action, per resource kind.
//!
//! Handlers never compare roles themselves; they name an [`Action`] and the
//! oracle checks the caller's membership against this table.

use withme_model::{ResourceKind, Role};

use Role::{Admin, Contributor, Editor, Owner, Viewer};

/// Something a caller wants to do to a trip or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ViewResource,
    UpdateResource,
    DeleteResource,
    ListMembers,
    /// Invite, change role, remove.
    ManageMembers,
    ReviewAccessRequests,
    CreateNote,
    ListNotes,
    EditNote,
    DeleteNote,
}

impl Action {
    /// Phrase used in "Forbidden: ..." messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Action::ViewResource => "you cannot view this resource",
            Action::UpdateResource => "you cannot edit this resource",
            Action::DeleteResource => "you cannot delete this resource",
            Action::ListMembers => "you cannot list members",
            Action::ManageMembers => "you cannot manage members",
            Action::ReviewAccessRequests => "you cannot review access requests",
            Action::CreateNote => "you cannot add notes to this trip",
            Action::ListNotes => "you cannot read notes on this trip",
            Action::EditNote => "you cannot edit this note",
            Action::DeleteNote => "you cannot delete this note",
        }
    }
}

/// Roles allowed to perform `action` on a resource of `kind`.
///
/// Empty means the action does not exist for that kind (notes on groups).
pub fn allowed_roles(action: Action, kind: ResourceKind) -> &'static [Role] {
    match kind {
        ResourceKind::Trip => match action {
            Action::ViewResource | Action::ListMembers | Action::ListNotes => {
                &[Viewer, Contributor, Editor, Admin]
            }
            Action::UpdateResource | Action::EditNote | Action::DeleteNote => &[Editor, Admin],
            Action::CreateNote => &[Contributor, Editor, Admin],
            Action::DeleteResource | Action::ManageMembers | Action::ReviewAccessRequests => {
                &[Admin]
            }
        },
        ResourceKind::Group => match action {
            Action::ViewResource | Action::ListMembers => {
                &[Viewer, Contributor, Editor, Admin, Owner]
            }
            Action::UpdateResource | Action::ManageMembers | Action::ReviewAccessRequests => {
                &[Admin, Owner]
            }
            Action::DeleteResource => &[Owner],
            Action::CreateNote | Action::ListNotes | Action::EditNote | Action::DeleteNote => &[],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ALL: [Action; 10] = [
        Action::ViewResource,
        Action::UpdateResource,
        Action::DeleteResource,
        Action::ListMembers,
        Action::ManageMembers,
        Action::ReviewAccessRequests,
        Action::CreateNote,
        Action::ListNotes,
        Action::EditNote,
        Action::DeleteNote,
    ];

    #[test]
    fn test_every_listed_role_is_valid_for_its_kind() {
        for kind in [ResourceKind::Trip, ResourceKind::Group] {
            for action in ALL {
                for role in allowed_roles(action, kind) {
                    assert!(role.is_valid_for(kind), "{action:?} lists {role} for {kind}");
                }
            }
        }
    }

    #[test]
    fn test_creator_can_do_everything_on_own_kind() {
        for action in ALL {
            assert!(allowed_roles(action, ResourceKind::Trip).contains(&Admin));
        }
        for action in [
            Action::ViewResource,
            Action::UpdateResource,
            Action::DeleteResource,
            Action::ManageMembers,
            Action::ReviewAccessRequests,
        ] {
            assert!(allowed_roles(action, ResourceKind::Group).contains(&Owner));
        }
    }

    #[rstest]
    #[case(Action::EditNote, Viewer, false)]
    #[case(Action::EditNote, Contributor, false)]
    #[case(Action::EditNote, Editor, true)]
    #[case(Action::CreateNote, Contributor, true)]
    #[case(Action::CreateNote, Viewer, false)]
    #[case(Action::ListNotes, Viewer, true)]
    #[case(Action::DeleteResource, Editor, false)]
    #[case(Action::ManageMembers, Editor, false)]
    fn test_trip_policy(#[case] action: Action, #[case] role: Role, #[case] allowed: bool) {
        assert_eq!(
            allowed_roles(action, ResourceKind::Trip).contains(&role),
            allowed
        );
    }

    #[rstest]
    #[case(Action::DeleteResource, Admin, false)]
    #[case(Action::UpdateResource, Admin, true)]
    #[case(Action::ReviewAccessRequests, Editor, false)]
    fn test_group_policy(#[case] action: Action, #[case] role: Role, #[case] allowed: bool) {
        assert_eq!(
            allowed_roles(action, ResourceKind::Group).contains(&role),
            allowed
        );
    }

    #[test]
    fn test_groups_have_no_notes() {
        assert!(allowed_roles(Action::CreateNote, ResourceKind::Group).is_empty());
    }
}
