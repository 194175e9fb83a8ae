//! Prefixed ID generation.
//!
//! Session IDs use a `ses_` prefix followed by a UUIDv7 (time-ordered), so
//! they are globally unique, sortable by creation time, and recognizable in
//! logs and metric tags.

use uuid::Uuid;

/// Generate a prefixed ID using UUIDv7.
fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a measurement session ID: `ses_<uuid7>`
pub fn session_id() -> String {
    prefixed_id("ses")
}
