use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::Patient;

const PATIENT_COLUMNS: &str =
    "id, mrn, first_name, last_name, date_of_birth, sex, phone, email, address, registered_at";

pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, mrn, first_name, last_name, date_of_birth, sex, phone, email,
                               address, registered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            patient.id.to_string(),
            patient.mrn,
            patient.first_name,
            patient.last_name,
            patient.date_of_birth,
            patient.sex,
            patient.phone,
            patient.email,
            patient.address,
            patient.registered_at,
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], row_to_patient_row);
    match result {
        Ok(row) => Ok(Some(patient_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_patient_by_mrn(conn: &Connection, mrn: &str) -> Result<Option<Patient>, DatabaseError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE mrn = ?1"))?;
    let result = stmt.query_row(params![mrn], row_to_patient_row);
    match result {
        Ok(row) => Ok(Some(patient_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn patient_exists(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM patients WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Page through all patients ordered by name. Returns the page plus the
/// total row count for pagination metadata.
pub fn list_patients(
    conn: &Connection,
    page: i64,
    limit: i64,
) -> Result<(Vec<Patient>, i64), DatabaseError> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients
         ORDER BY last_name, first_name
         LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt.query_map(params![limit, (page - 1) * limit], row_to_patient_row)?;

    Ok((patient_rows_to_vec(rows)?, total))
}

/// Name or MRN substring search, paged.
pub fn search_patients(
    conn: &Connection,
    query: &str,
    page: i64,
    limit: i64,
) -> Result<(Vec<Patient>, i64), DatabaseError> {
    let pattern = super::like_pattern(query);

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM patients
         WHERE first_name LIKE ?1 ESCAPE '\\' OR last_name LIKE ?1 ESCAPE '\\'
            OR mrn LIKE ?1 ESCAPE '\\'",
        params![pattern],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients
         WHERE first_name LIKE ?1 ESCAPE '\\' OR last_name LIKE ?1 ESCAPE '\\'
            OR mrn LIKE ?1 ESCAPE '\\'
         ORDER BY last_name, first_name
         LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![pattern, limit, (page - 1) * limit], row_to_patient_row)?;

    Ok((patient_rows_to_vec(rows)?, total))
}

struct PatientRow {
    id: String,
    mrn: String,
    first_name: String,
    last_name: String,
    date_of_birth: Option<NaiveDate>,
    sex: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    registered_at: DateTime<Utc>,
}

fn row_to_patient_row(row: &rusqlite::Row) -> rusqlite::Result<PatientRow> {
    Ok(PatientRow {
        id: row.get(0)?,
        mrn: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        date_of_birth: row.get(4)?,
        sex: row.get(5)?,
        phone: row.get(6)?,
        email: row.get(7)?,
        address: row.get(8)?,
        registered_at: row.get(9)?,
    })
}

fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    Ok(Patient {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        mrn: row.mrn,
        first_name: row.first_name,
        last_name: row.last_name,
        date_of_birth: row.date_of_birth,
        sex: row.sex,
        phone: row.phone,
        email: row.email,
        address: row.address,
        registered_at: row.registered_at,
    })
}

fn patient_rows_to_vec(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<PatientRow>>,
) -> Result<Vec<Patient>, DatabaseError> {
    let mut patients = Vec::new();
    for row in rows {
        patients.push(patient_from_row(row?)?);
    }
    Ok(patients)
}
