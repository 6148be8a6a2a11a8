//! Store error types.

use std::fmt;

use thiserror::Error;
use withme_model::AccessRequestStatus;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/api.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// The addressed record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The write would break a membership or workflow invariant.
    #[error("conflict: {0}")]
    Conflict(Conflict),

    /// A stored value could not be decoded into the model.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Query(err)
    }
}

impl DbError {
    /// True for errors the caller caused, as opposed to infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        matches!(self, DbError::NotFound(_) | DbError::Conflict(_))
    }
}

/// Invariant violations reported as 409s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// A membership row already exists for this user and resource.
    AlreadyMember,
    /// The requester already has an unresolved request for this resource.
    PendingRequestExists,
    /// The access request left `pending` before this write.
    AlreadyResolved(AccessRequestStatus),
    /// The change would leave the resource without an owner/admin.
    LastOwner,
}

impl Conflict {
    pub fn code(&self) -> &'static str {
        match self {
            Conflict::AlreadyMember => "already_member",
            Conflict::PendingRequestExists => "request_pending",
            Conflict::AlreadyResolved(_) => "request_already_resolved",
            Conflict::LastOwner => "last_owner",
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::AlreadyMember => f.write_str("already a member of this resource"),
            Conflict::PendingRequestExists => {
                f.write_str("an access request for this resource is already pending")
            }
            Conflict::AlreadyResolved(status) => {
                write!(f, "access request was already {}", status.as_str())
            }
            Conflict::LastOwner => f.write_str("cannot remove or demote the last owner"),
        }
    }
}

/// Whether a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
