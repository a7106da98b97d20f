//! Patient endpoints: paged listing, name/MRN search, lookup, registration.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, PageQuery, Paginated};
use crate::db::repository;
use crate::models::Patient;

/// `GET /patients` — all patients, alphabetical, paged.
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Patient>>, ApiError> {
    let (page, limit) = query.normalize();
    let conn = ctx.state.db.connect()?;
    let (patients, total) = repository::list_patients(&conn, page, limit)?;
    Ok(Json(Paginated::new(patients, total, page, limit)))
}

// Query params stay unflattened: serde_urlencoded cannot parse integers
// through #[serde(flatten)].
#[derive(Deserialize)]
pub struct PatientSearchQuery {
    pub q: String,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /patients/search?q=` — match against name or MRN.
pub async fn search(
    State(ctx): State<ApiContext>,
    Query(query): Query<PatientSearchQuery>,
) -> Result<Json<Paginated<Patient>>, ApiError> {
    let needle = query.q.trim();
    if needle.is_empty() {
        return Err(ApiError::BadRequest("Search query is required".into()));
    }

    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .normalize();
    let conn = ctx.state.db.connect()?;
    let (patients, total) = repository::search_patients(&conn, needle, page, limit)?;
    Ok(Json(Paginated::new(patients, total, page, limit)))
}

/// `GET /patients/:id`
pub async fn get(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Patient>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid patient ID: {e}")))?;

    let conn = ctx.state.db.connect()?;
    let patient = repository::get_patient(&conn, &id)?
        .ok_or(ApiError::NotFound("Patient not found".into()))?;
    Ok(Json(patient))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// `POST /patients` — register a patient. The MRN must be new.
pub async fn create(
    State(ctx): State<ApiContext>,
    Json(request): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let mrn = request.mrn.trim().to_string();
    if mrn.is_empty() {
        return Err(ApiError::BadRequest("MRN is required".into()));
    }
    if request.first_name.trim().is_empty() || request.last_name.trim().is_empty() {
        return Err(ApiError::BadRequest("First and last name are required".into()));
    }

    let conn = ctx.state.db.connect()?;
    if repository::get_patient_by_mrn(&conn, &mrn)?.is_some() {
        return Err(ApiError::Conflict("MRN already registered".into()));
    }

    let patient = Patient {
        id: Uuid::new_v4(),
        mrn,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        date_of_birth: request.date_of_birth,
        sex: request.sex,
        phone: request.phone,
        email: request.email,
        address: request.address,
        registered_at: Utc::now(),
    };

    repository::insert_patient(&conn, &patient).map_err(|e| match e {
        crate::db::DatabaseError::ConstraintViolation(_) => {
            ApiError::Conflict("MRN already registered".into())
        }
        other => other.into(),
    })?;

    tracing::info!(mrn = %patient.mrn, "Registered patient");
    Ok((StatusCode::CREATED, Json(patient)))
}
