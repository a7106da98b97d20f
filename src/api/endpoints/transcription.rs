//! Audio transcription endpoint. The audio is proxied to the speech
//! provider and never stored.

use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::transcription::Transcript;

/// Decoded audio cap. Matches a few minutes of compressed dictation.
pub const MAX_AUDIO_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MIME_TYPE: &str = "audio/webm";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub audio: String,
    pub mime_type: Option<String>,
    pub language: Option<String>,
}

/// `POST /transcription/transcribe` — base64 audio in, transcript out.
/// Answers 503 when no speech provider is configured or it cannot be
/// reached.
pub async fn transcribe(
    State(ctx): State<ApiContext>,
    Json(request): Json<TranscribeRequest>,
) -> Result<Json<Transcript>, ApiError> {
    if request.audio.trim().is_empty() {
        return Err(ApiError::BadRequest("Audio payload is required".into()));
    }

    let audio = STANDARD
        .decode(request.audio.trim())
        .map_err(|e| ApiError::BadRequest(format!("Audio must be valid base64: {e}")))?;

    if audio.is_empty() {
        return Err(ApiError::BadRequest("Audio payload is empty".into()));
    }
    if audio.len() > MAX_AUDIO_BYTES {
        return Err(ApiError::BadRequest(format!(
            "Audio exceeds the {} MB limit",
            MAX_AUDIO_BYTES / (1024 * 1024)
        )));
    }

    let transcriber = ctx
        .state
        .speech
        .as_ref()
        .ok_or(ApiError::ServiceUnavailable("Transcription is not configured".into()))?;

    let mime_type = request.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE);
    let transcript = transcriber
        .transcribe(&audio, mime_type, request.language.as_deref())
        .await
        .map_err(|e| {
            tracing::warn!("Transcription failed: {e}");
            ApiError::ServiceUnavailable("Speech provider unavailable".into())
        })?;

    Ok(Json(transcript))
}
