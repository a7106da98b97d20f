//! Repository layer — entity-scoped database operations.
//!
//! Free functions over a borrowed [`rusqlite::Connection`]; callers own the
//! connection lifecycle. All public functions are re-exported here.

mod diagnosis_codes;
mod patients;
mod soap_notes;
mod users;

pub use diagnosis_codes::*;
pub use patients::*;
pub use soap_notes::*;
pub use users::*;

/// Escape LIKE wildcards in user input and wrap it for substring matching.
/// Queries using the result must carry `ESCAPE '\'`.
pub(crate) fn like_pattern(query: &str) -> String {
    let escaped = query
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
