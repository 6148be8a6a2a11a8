//! # withme-model
//!
//! The vocabulary shared by every withme.travel service: roles, membership
//! and access-request states, and the records the store hands back.
//!
//! ## Roles
//!
//! Roles are ordered `viewer < contributor < editor < admin < owner`, with
//! `owner` reserved for groups. The ordering exists for display and
//! sorting only: authorization always checks membership of an explicit
//! allow-list, never `role >= threshold`.
//!
//! ## Resources
//!
//! Trips and groups share one membership model. A [`ResourceId`] carries the
//! kind in its id prefix, so a membership row only needs the id string.

mod error;
mod records;
mod types;

pub use error::ModelError;
pub use records::*;
pub use types::*;
