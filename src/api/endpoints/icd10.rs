//! ICD-10 endpoints, backed by the cache-first resolver.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::icd::{self, resolver::DEFAULT_SEARCH_LIMIT, SeedOutcome};
use crate::models::DiagnosisCode;

#[derive(Deserialize)]
pub struct CodeSearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

/// `GET /icd10/search?q=&limit=` — layered search; a short or empty query
/// returns the most-used codes.
pub async fn search(
    State(ctx): State<ApiContext>,
    Query(query): Query<CodeSearchQuery>,
) -> Result<Json<Vec<DiagnosisCode>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let results = ctx.state.resolver.search(&query.q, limit).await?;
    Ok(Json(results))
}

/// `GET /icd10/code/:code` — exact lookup. A local hit counts as a use.
pub async fn lookup(
    State(ctx): State<ApiContext>,
    Path(code): Path<String>,
) -> Result<Json<DiagnosisCode>, ApiError> {
    let found = ctx
        .state
        .resolver
        .lookup(&code)
        .await?
        .ok_or(ApiError::NotFound("Code not found".into()))?;
    Ok(Json(found))
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub code: String,
    pub valid: bool,
}

/// `GET /icd10/validate/:code` — structural format check only.
pub async fn validate(Path(code): Path<String>) -> Json<ValidateResponse> {
    let normalized = icd::normalize_code(&code);
    let valid = icd::is_valid_code_format(&normalized);
    Json(ValidateResponse {
        code: normalized,
        valid,
    })
}

/// `POST /icd10/seed` — load the starter code set. Safe to repeat.
pub async fn seed(State(ctx): State<ApiContext>) -> Result<Json<SeedOutcome>, ApiError> {
    let outcome = ctx.state.resolver.seed()?;
    Ok(Json(outcome))
}
