//! Errors raised while parsing or transitioning model values.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("role '{role}' is not valid for a {kind}")]
    RoleNotAllowed { role: String, kind: &'static str },

    #[error("unknown membership status: {0}")]
    UnknownMembershipStatus(String),

    #[error("unknown access request status: {0}")]
    UnknownRequestStatus(String),

    #[error("unknown group visibility: {0}")]
    UnknownVisibility(String),

    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    /// An access request may only leave `pending` once.
    #[error("access request already {0}")]
    AlreadyResolved(&'static str),
}
