//! SOAP note endpoints: CRUD, status transitions, and the per-patient list.
//!
//! Content edits go through the history-recording repository path; status
//! changes deliberately do not.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, CurrentUser, PageQuery, Paginated};
use crate::db::repository;
use crate::models::{NoteContentUpdate, NoteFilter, NoteStatus, SoapNote};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteListQuery {
    pub status: Option<NoteStatus>,
    pub author_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /soap-notes` — newest first, filterable by status and author.
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<NoteListQuery>,
) -> Result<Json<Paginated<SoapNote>>, ApiError> {
    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .normalize();

    let filter = NoteFilter {
        status: query.status,
        author_id: query.author_id,
        patient_id: query.patient_id,
    };

    let conn = ctx.state.db.connect()?;
    let (notes, total) = repository::list_notes(&conn, &filter, page, limit)?;
    Ok(Json(Paginated::new(notes, total, page, limit)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteRequest {
    pub patient_id: Uuid,
    #[serde(default)]
    pub symptoms: String,
    #[serde(default)]
    pub examination: String,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub management: String,
    pub status: Option<NoteStatus>,
}

/// `POST /soap-notes` — create a note authored by the current user.
///
/// The patient must exist. The author is re-checked against the database so
/// a token issued before an account was deleted cannot create orphan rows.
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<SoapNote>), ApiError> {
    let conn = ctx.state.db.connect()?;

    if !repository::patient_exists(&conn, &request.patient_id)? {
        return Err(ApiError::NotFound("Patient not found".into()));
    }
    if !repository::user_exists(&conn, &user.id)? {
        return Err(ApiError::Unauthorized("User account no longer exists".into()));
    }

    let now = Utc::now();
    let note = SoapNote {
        id: Uuid::new_v4(),
        patient_id: request.patient_id,
        author_id: user.id,
        symptoms: request.symptoms,
        examination: request.examination,
        diagnosis: request.diagnosis,
        management: request.management,
        status: request.status.unwrap_or(NoteStatus::Draft),
        was_edited: false,
        edit_history: Vec::new(),
        last_edited_by: None,
        last_edited_at: None,
        created_at: now,
        updated_at: now,
    };

    repository::insert_note(&conn, &note)?;
    tracing::info!(note = %note.id, patient = %note.patient_id, "Created SOAP note");
    Ok((StatusCode::CREATED, Json(note)))
}

/// `GET /soap-notes/:id`
pub async fn get(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<SoapNote>, ApiError> {
    let id = parse_note_id(&id)?;
    let conn = ctx.state.db.connect()?;
    let note = repository::get_note(&conn, &id)?
        .ok_or(ApiError::NotFound("Note not found".into()))?;
    Ok(Json(note))
}

/// `PATCH /soap-notes/:id` — partial content edit with history.
///
/// Sending identical content is a no-op: nothing is written and no history
/// entry appears.
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(update): Json<NoteContentUpdate>,
) -> Result<Json<SoapNote>, ApiError> {
    let id = parse_note_id(&id)?;
    let conn = ctx.state.db.connect()?;
    let note = repository::get_note(&conn, &id)?
        .ok_or(ApiError::NotFound("Note not found".into()))?;

    let updated = repository::update_note_content(&conn, &note, &update, &user.id, &user.name)?;
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: NoteStatus,
}

/// `PATCH /soap-notes/:id/status` — draft/finalized/amended transition.
/// Not a content edit; the history stays untouched.
pub async fn update_status(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<SoapNote>, ApiError> {
    let id = parse_note_id(&id)?;
    let conn = ctx.state.db.connect()?;

    if repository::get_note(&conn, &id)?.is_none() {
        return Err(ApiError::NotFound("Note not found".into()));
    }

    repository::update_note_status(&conn, &id, request.status)?;
    let note = repository::get_note(&conn, &id)?
        .ok_or(ApiError::NotFound("Note not found".into()))?;
    Ok(Json(note))
}

/// `DELETE /soap-notes/:id` — permanent removal.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_note_id(&id)?;
    let conn = ctx.state.db.connect()?;

    if !repository::delete_note(&conn, &id)? {
        return Err(ApiError::NotFound("Note not found".into()));
    }
    tracing::info!(note = %id, "Deleted SOAP note");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientNotesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /soap-notes/patient/:patientId` — a patient's notes, newest first.
pub async fn by_patient(
    State(ctx): State<ApiContext>,
    Path(patient_id): Path<String>,
    Query(query): Query<PatientNotesQuery>,
) -> Result<Json<Paginated<SoapNote>>, ApiError> {
    let patient_id = Uuid::parse_str(&patient_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid patient ID: {e}")))?;

    let conn = ctx.state.db.connect()?;
    if !repository::patient_exists(&conn, &patient_id)? {
        return Err(ApiError::NotFound("Patient not found".into()));
    }

    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .normalize();

    let filter = NoteFilter {
        patient_id: Some(patient_id),
        ..NoteFilter::default()
    };
    let (notes, total) = repository::list_notes(&conn, &filter, page, limit)?;
    Ok(Json(Paginated::new(notes, total, page, limit)))
}

fn parse_note_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|e| ApiError::BadRequest(format!("Invalid note ID: {e}")))
}
