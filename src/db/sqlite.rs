use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing;

use super::DatabaseError;

/// Cheap-to-clone handle on the database file. Every caller opens its own
/// short-lived connection; WAL plus a busy timeout lets concurrent request
/// handlers write without coordination.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open the database at `path`, creating and migrating it as needed.
    pub fn init(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Open a fresh connection for the current request or task.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = Connection::open(&self.path)?;
        configure_pragmas(&conn)?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA busy_timeout=5000;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        include_str!("../../resources/migrations/001_initial.sql"),
    )];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, i64>(0)
    })
    .unwrap_or(0)
}

/// Try to create the trigram FTS5 index backing fuzzy code search. Trigram
/// tokenization needs a recent SQLite; when the build lacks it the probe
/// fails once at startup and search simply runs without the fuzzy step.
pub fn probe_trigram_index(conn: &Connection) -> bool {
    let probe = conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS diagnosis_codes_fts USING fts5(
             code, short_description, long_description, search_terms,
             tokenize='trigram'
         );",
    );
    match probe {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Trigram index unavailable, fuzzy code search disabled: {e}");
            false
        }
    }
}

/// Count tables in the database (for verification)
pub fn count_tables(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_initializes_all_tables() {
        let conn = open_memory_database().unwrap();
        // users + patients + soap_notes + diagnosis_codes + schema_version
        let count = count_tables(&conn).unwrap();
        assert!(count >= 5, "Expected at least 5 tables, got {count}");
    }

    #[test]
    fn schema_version_is_current() {
        let conn = open_memory_database().unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn migration_idempotent() {
        let conn = open_memory_database().unwrap();
        // Running migrations again should not error
        let result = run_migrations(&conn);
        assert!(result.is_ok());
    }

    #[test]
    fn foreign_keys_enabled() {
        let conn = open_memory_database().unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn trigram_probe_succeeds_on_bundled_sqlite() {
        let conn = open_memory_database().unwrap();
        assert!(probe_trigram_index(&conn));
        // Running the probe again is a no-op
        assert!(probe_trigram_index(&conn));
    }

    #[test]
    fn init_creates_file_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charta.db");
        let db = Database::init(&path).unwrap();
        let conn = db.connect().unwrap();
        assert!(count_tables(&conn).unwrap() >= 5);
        // Second init sees the migrated schema
        let db2 = Database::init(&path).unwrap();
        assert!(db2.connect().is_ok());
    }
}
