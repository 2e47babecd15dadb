//! UUIDv7 identifiers.
//!
//! Tasks and documents use UUIDv7 so identifiers sort by creation time,
//! which keeps oldest-first queue scans index-friendly.

use uuid::Uuid;

/// Generate a new time-ordered UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check whether a UUID is version 7.
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}
