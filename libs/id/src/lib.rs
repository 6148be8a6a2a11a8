//! # withme-id
//!
//! Typed identifiers for withme.travel resources.
//!
//! Every id is rendered as `{prefix}_{ulid}`:
//!
//! - `trip_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `grp_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `usr_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! The prefix makes a trip id impossible to pass where a group id is
//! expected, and lets a bare resource id string be routed back to its kind.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

pub use ulid::Ulid;

/// Splits `s` into its prefix and ULID, checking the prefix against `expected`.
///
/// Shared by every type generated with [`define_id!`].
pub fn parse_prefixed(expected: &'static str, s: &str) -> Result<Ulid, IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }

    let (prefix, raw) = s.split_once('_').ok_or(IdError::MissingSeparator)?;
    if prefix != expected {
        return Err(IdError::InvalidPrefix {
            expected,
            actual: prefix.to_string(),
        });
    }

    raw.parse::<Ulid>()
        .map_err(|e| IdError::InvalidUlid(e.to_string()))
}
