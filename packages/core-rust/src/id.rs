//! Identifier generation for operations and operation sets.

/// Returns a new globally unique identifier.
///
/// Identifiers are random 128-bit values formatted as a hyphenated GUID.
/// Operation and operation-set identifiers share one namespace, so a lookup
/// by identifier never has to disambiguate between the two.
#[must_use]
pub fn new_guid() -> String {
    uuid::Uuid::new_v4().to_string()
}
