pub mod repository;
pub mod sqlite;

pub use sqlite::*;

use rusqlite::ffi;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Uniqueness races are resolved by the engine, not by locking: writers
/// insert optimistically and the extended result code tells us a duplicate
/// lost the race. Those become `ConstraintViolation` so the API layer can
/// answer 409 instead of 500.
impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, ref message) = err {
            match code.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return DatabaseError::ConstraintViolation(
                        message
                            .clone()
                            .unwrap_or_else(|| "unique constraint violated".into()),
                    );
                }
                _ => {}
            }
        }
        DatabaseError::Sqlite(err)
    }
}
