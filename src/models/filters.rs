use uuid::Uuid;

use super::enums::NoteStatus;

#[derive(Debug, Default)]
pub struct NoteFilter {
    pub status: Option<NoteStatus>,
    pub author_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
}
