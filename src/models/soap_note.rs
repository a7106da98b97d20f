use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::NoteStatus;

/// A SOAP note: symptoms (subjective), examination (objective), diagnosis
/// (assessment), and management (plan).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapNote {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub author_id: Uuid,
    pub symptoms: String,
    pub examination: String,
    pub diagnosis: String,
    pub management: String,
    pub status: NoteStatus,
    pub was_edited: bool,
    /// Append-only. Entries are never rewritten or removed.
    pub edit_history: Vec<EditHistoryEntry>,
    pub last_edited_by: Option<String>,
    pub last_edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One recorded edit: who, when, and the per-field old/new values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditHistoryEntry {
    pub editor_id: Uuid,
    pub editor_name: String,
    pub edited_at: DateTime<Utc>,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

/// Partial content edit. `None` leaves a section untouched; `Some` replaces
/// it (and lands in the edit history if the text actually differs).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteContentUpdate {
    pub symptoms: Option<String>,
    pub examination: Option<String>,
    pub diagnosis: Option<String>,
    pub management: Option<String>,
}
