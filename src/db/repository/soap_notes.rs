use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::NoteStatus;
use crate::models::filters::NoteFilter;
use crate::models::soap_note::NoteContentUpdate;
use crate::models::{EditHistoryEntry, FieldChange, SoapNote};

const NOTE_COLUMNS: &str = "id, patient_id, author_id, symptoms, examination, diagnosis,
     management, status, was_edited, edit_history, last_edited_by, last_edited_at,
     created_at, updated_at";

pub fn insert_note(conn: &Connection, note: &SoapNote) -> Result<(), DatabaseError> {
    let history_json = history_to_json(&note.edit_history)?;
    conn.execute(
        "INSERT INTO soap_notes (id, patient_id, author_id, symptoms, examination, diagnosis,
                                 management, status, was_edited, edit_history, last_edited_by,
                                 last_edited_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            note.id.to_string(),
            note.patient_id.to_string(),
            note.author_id.to_string(),
            note.symptoms,
            note.examination,
            note.diagnosis,
            note.management,
            note.status.as_str(),
            note.was_edited,
            history_json,
            note.last_edited_by,
            note.last_edited_at,
            note.created_at,
            note.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_note(conn: &Connection, id: &Uuid) -> Result<Option<SoapNote>, DatabaseError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {NOTE_COLUMNS} FROM soap_notes WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], row_to_note_row);
    match result {
        Ok(row) => Ok(Some(note_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Apply a content edit to `note`, recording per-field changes in the edit
/// history. Fields absent from the update are untouched; fields equal to the
/// current value produce no change entry. An update where nothing actually
/// changed writes nothing and leaves `was_edited` alone.
///
/// The history array is rebuilt from this caller's read snapshot; concurrent
/// editors of the same note are last-write-wins, history included.
pub fn update_note_content(
    conn: &Connection,
    note: &SoapNote,
    update: &NoteContentUpdate,
    editor_id: &Uuid,
    editor_name: &str,
) -> Result<SoapNote, DatabaseError> {
    let mut updated = note.clone();
    let mut changes = Vec::new();

    diff_field(&mut changes, "symptoms", &mut updated.symptoms, &update.symptoms);
    diff_field(&mut changes, "examination", &mut updated.examination, &update.examination);
    diff_field(&mut changes, "diagnosis", &mut updated.diagnosis, &update.diagnosis);
    diff_field(&mut changes, "management", &mut updated.management, &update.management);

    if changes.is_empty() {
        return Ok(updated);
    }

    let now = Utc::now();
    updated.edit_history.push(EditHistoryEntry {
        editor_id: *editor_id,
        editor_name: editor_name.to_string(),
        edited_at: now,
        changes,
    });
    updated.was_edited = true;
    updated.last_edited_by = Some(editor_name.to_string());
    updated.last_edited_at = Some(now);
    updated.updated_at = now;

    let history_json = history_to_json(&updated.edit_history)?;
    let changed = conn.execute(
        "UPDATE soap_notes SET symptoms = ?2, examination = ?3, diagnosis = ?4, management = ?5,
                               was_edited = ?6, edit_history = ?7, last_edited_by = ?8,
                               last_edited_at = ?9, updated_at = ?10
         WHERE id = ?1",
        params![
            updated.id.to_string(),
            updated.symptoms,
            updated.examination,
            updated.diagnosis,
            updated.management,
            updated.was_edited,
            history_json,
            updated.last_edited_by,
            updated.last_edited_at,
            updated.updated_at,
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "soap_note".into(),
            id: updated.id.to_string(),
        });
    }
    Ok(updated)
}

/// Change only the workflow status. Does not count as a content edit, so
/// `was_edited` and the history are untouched.
pub fn update_note_status(
    conn: &Connection,
    id: &Uuid,
    status: NoteStatus,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE soap_notes SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), status.as_str(), Utc::now()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "soap_note".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Returns false when no note with that id existed.
pub fn delete_note(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM soap_notes WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Filtered, paged listing ordered newest first.
pub fn list_notes(
    conn: &Connection,
    filter: &NoteFilter,
    page: i64,
    limit: i64,
) -> Result<(Vec<SoapNote>, i64), DatabaseError> {
    let mut where_sql = String::from(" WHERE 1=1");
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    if let Some(status) = &filter.status {
        where_sql.push_str(&format!(" AND status = ?{param_idx}"));
        params_vec.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }

    if let Some(author_id) = &filter.author_id {
        where_sql.push_str(&format!(" AND author_id = ?{param_idx}"));
        params_vec.push(Box::new(author_id.to_string()));
        param_idx += 1;
    }

    if let Some(patient_id) = &filter.patient_id {
        where_sql.push_str(&format!(" AND patient_id = ?{param_idx}"));
        params_vec.push(Box::new(patient_id.to_string()));
        param_idx += 1;
    }

    let count_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM soap_notes{where_sql}"),
        count_refs.as_slice(),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {NOTE_COLUMNS} FROM soap_notes{where_sql}
         ORDER BY created_at DESC
         LIMIT ?{param_idx} OFFSET ?{next_idx}",
        next_idx = param_idx + 1
    );
    params_vec.push(Box::new(limit));
    params_vec.push(Box::new((page - 1) * limit));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), row_to_note_row)?;

    let mut notes = Vec::new();
    for row in rows {
        notes.push(note_from_row(row?)?);
    }
    Ok((notes, total))
}

fn diff_field(
    changes: &mut Vec<FieldChange>,
    name: &str,
    current: &mut String,
    incoming: &Option<String>,
) {
    if let Some(next) = incoming {
        if next != current {
            changes.push(FieldChange {
                field: name.to_string(),
                old: current.clone(),
                new: next.clone(),
            });
            *current = next.clone();
        }
    }
}

fn history_to_json(history: &[EditHistoryEntry]) -> Result<String, DatabaseError> {
    serde_json::to_string(history).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

struct NoteRow {
    id: String,
    patient_id: String,
    author_id: String,
    symptoms: String,
    examination: String,
    diagnosis: String,
    management: String,
    status: String,
    was_edited: bool,
    edit_history: String,
    last_edited_by: Option<String>,
    last_edited_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn row_to_note_row(row: &rusqlite::Row) -> rusqlite::Result<NoteRow> {
    Ok(NoteRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        author_id: row.get(2)?,
        symptoms: row.get(3)?,
        examination: row.get(4)?,
        diagnosis: row.get(5)?,
        management: row.get(6)?,
        status: row.get(7)?,
        was_edited: row.get(8)?,
        edit_history: row.get(9)?,
        last_edited_by: row.get(10)?,
        last_edited_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn note_from_row(row: NoteRow) -> Result<SoapNote, DatabaseError> {
    Ok(SoapNote {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        patient_id: Uuid::parse_str(&row.patient_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        author_id: Uuid::parse_str(&row.author_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        symptoms: row.symptoms,
        examination: row.examination,
        diagnosis: row.diagnosis,
        management: row.management,
        status: NoteStatus::from_str(&row.status)?,
        was_edited: row.was_edited,
        edit_history: serde_json::from_str(&row.edit_history)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        last_edited_by: row.last_edited_by,
        last_edited_at: row.last_edited_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
