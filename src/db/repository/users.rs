use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::UserRole;
use crate::models::User;

const USER_COLUMNS: &str = "id, email, password_hash, password_salt, first_name, last_name, role,
     is_active, reset_token, reset_token_expires_at, reset_code_hash, reset_code_expires_at,
     reset_code_attempts, created_at";

pub fn insert_user(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, email, password_hash, password_salt, first_name, last_name, role,
                            is_active, reset_token, reset_token_expires_at, reset_code_hash,
                            reset_code_expires_at, reset_code_attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            user.id.to_string(),
            user.email,
            user.password_hash,
            user.password_salt,
            user.first_name,
            user.last_name,
            user.role.as_str(),
            user.is_active,
            user.reset_token,
            user.reset_token_expires_at,
            user.reset_code_hash,
            user.reset_code_expires_at,
            user.reset_code_attempts,
            user.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    query_one_user(
        conn,
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id.to_string()],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, DatabaseError> {
    query_one_user(
        conn,
        &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE"),
        params![email.trim()],
    )
}

pub fn get_user_by_reset_token(
    conn: &Connection,
    token: &str,
) -> Result<Option<User>, DatabaseError> {
    query_one_user(
        conn,
        &format!("SELECT {USER_COLUMNS} FROM users WHERE reset_token = ?1"),
        params![token],
    )
}

/// Replace the stored credential and void any outstanding reset state.
pub fn set_user_password(
    conn: &Connection,
    id: &Uuid,
    salt: &str,
    hash: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET password_salt = ?2, password_hash = ?3,
                          reset_token = NULL, reset_token_expires_at = NULL,
                          reset_code_hash = NULL, reset_code_expires_at = NULL,
                          reset_code_attempts = 0
         WHERE id = ?1",
        params![id.to_string(), salt, hash],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "user".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn set_reset_token(
    conn: &Connection,
    id: &Uuid,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET reset_token = ?2, reset_token_expires_at = ?3 WHERE id = ?1",
        params![id.to_string(), token, expires_at],
    )?;
    Ok(())
}

/// Store a new reset code hash. Resets the attempt counter.
pub fn set_reset_code(
    conn: &Connection,
    id: &Uuid,
    code_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET reset_code_hash = ?2, reset_code_expires_at = ?3,
                          reset_code_attempts = 0
         WHERE id = ?1",
        params![id.to_string(), code_hash, expires_at],
    )?;
    Ok(())
}

/// Count a failed code verification. Once `max_attempts` is reached the code
/// is wiped, so later attempts see no code at all. Returns the new count.
pub fn record_reset_code_attempt(
    conn: &Connection,
    id: &Uuid,
    max_attempts: i64,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "UPDATE users SET reset_code_attempts = reset_code_attempts + 1 WHERE id = ?1",
        params![id.to_string()],
    )?;
    let attempts: i64 = conn.query_row(
        "SELECT reset_code_attempts FROM users WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    if attempts >= max_attempts {
        clear_reset_code(conn, id)?;
    }
    Ok(attempts)
}

pub fn clear_reset_code(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET reset_code_hash = NULL, reset_code_expires_at = NULL,
                          reset_code_attempts = 0
         WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(())
}

pub fn set_user_active(conn: &Connection, id: &Uuid, active: bool) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET is_active = ?2 WHERE id = ?1",
        params![id.to_string(), active],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "user".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn user_exists(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    password_salt: String,
    first_name: String,
    last_name: String,
    role: String,
    is_active: bool,
    reset_token: Option<String>,
    reset_token_expires_at: Option<DateTime<Utc>>,
    reset_code_hash: Option<String>,
    reset_code_expires_at: Option<DateTime<Utc>>,
    reset_code_attempts: i64,
    created_at: DateTime<Utc>,
}

fn query_one_user(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<User>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let result = stmt.query_row(params, |row| {
        Ok(UserRow {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            password_salt: row.get(3)?,
            first_name: row.get(4)?,
            last_name: row.get(5)?,
            role: row.get(6)?,
            is_active: row.get(7)?,
            reset_token: row.get(8)?,
            reset_token_expires_at: row.get(9)?,
            reset_code_hash: row.get(10)?,
            reset_code_expires_at: row.get(11)?,
            reset_code_attempts: row.get(12)?,
            created_at: row.get(13)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(user_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn user_from_row(row: UserRow) -> Result<User, DatabaseError> {
    Ok(User {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        email: row.email,
        password_hash: row.password_hash,
        password_salt: row.password_salt,
        first_name: row.first_name,
        last_name: row.last_name,
        role: UserRole::from_str(&row.role)?,
        is_active: row.is_active,
        reset_token: row.reset_token,
        reset_token_expires_at: row.reset_token_expires_at,
        reset_code_hash: row.reset_code_hash,
        reset_code_expires_at: row.reset_code_expires_at,
        reset_code_attempts: row.reset_code_attempts,
        created_at: row.created_at,
    })
}
