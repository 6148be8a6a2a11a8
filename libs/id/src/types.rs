//! Id types for every persisted withme.travel record.

use crate::define_id;

// =============================================================================
// Resources
// =============================================================================

define_id!(
    /// A trip, the itinerary-level resource.
    TripId,
    "trip"
);
define_id!(
    /// A travel group.
    GroupId,
    "grp"
);
define_id!(
    /// A note attached to a trip.
    NoteId,
    "note"
);

// =============================================================================
// Principals and Memberships
// =============================================================================

define_id!(
    /// An authenticated user, as asserted by the upstream auth provider.
    UserId,
    "usr"
);
define_id!(MembershipId, "mem");
define_id!(AccessRequestId, "areq");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_trip_id_roundtrip() {
        let id = TripId::new();
        let parsed: TripId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("trip_"));
    }

    #[test]
    fn test_group_id_rejects_trip_prefix() {
        let trip = TripId::new().to_string();
        let err = GroupId::parse(&trip).unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_missing_separator() {
        let err = UserId::parse("usr01HV4Z2WQXKJNM8GPQY6VBKC3D").unwrap_err();
        assert_eq!(err, crate::IdError::MissingSeparator);
    }

    #[test]
    fn test_empty() {
        assert_eq!(NoteId::parse("").unwrap_err(), crate::IdError::Empty);
    }

    #[test]
    fn test_invalid_ulid() {
        assert!(matches!(
            AccessRequestId::parse("areq_nope").unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_json_is_a_plain_string() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            TripId::PREFIX,
            GroupId::PREFIX,
            NoteId::PREFIX,
            UserId::PREFIX,
            MembershipId::PREFIX,
            AccessRequestId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn any_ulid_roundtrips_through_text(raw in any::<u128>()) {
            let id = TripId::from_ulid(crate::Ulid::from(raw));
            let parsed = TripId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
