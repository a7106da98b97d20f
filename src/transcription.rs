//! Speech-to-text proxying.
//!
//! Audio arrives from the client as base64 JSON; the raw bytes are forwarded
//! to a third-party speech API and the transcript comes back. Nothing is
//! stored on either side of the call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SpeechConfig;

/// Transcription jobs are slow; give the provider more room than other
/// outbound calls get.
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Could not reach speech provider at {0}")]
    Connection(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Speech provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse provider response: {0}")]
    ResponseParsing(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Turns recorded audio into text.
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        mime_type: &str,
        language: Option<&str>,
    ) -> Result<Transcript, SpeechError>;
}

/// Client for a speech API that accepts raw audio bytes and answers with a
/// JSON transcript.
pub struct HttpSpeechClient {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpSpeechClient {
    pub fn new(config: &SpeechConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        }
    }
}

#[async_trait]
impl SpeechTranscriber for HttpSpeechClient {
    async fn transcribe(
        &self,
        audio: &[u8],
        mime_type: &str,
        language: Option<&str>,
    ) -> Result<Transcript, SpeechError> {
        let mut request = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(audio.to_vec());
        if let Some(language) = language {
            request = request.query(&[("language", language)]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                SpeechError::Connection(self.api_url.clone())
            } else if e.is_timeout() {
                SpeechError::Http(format!(
                    "Request timed out after {REQUEST_TIMEOUT_SECS} seconds"
                ))
            } else {
                SpeechError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| SpeechError::ResponseParsing(e.to_string()))
    }
}

/// Mock transcriber with a fixed answer, for testing.
pub struct MockTranscriber {
    text: String,
    fail: bool,
}

impl MockTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            text: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl SpeechTranscriber for MockTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        _mime_type: &str,
        _language: Option<&str>,
    ) -> Result<Transcript, SpeechError> {
        if self.fail {
            return Err(SpeechError::Connection("mock provider".to_string()));
        }
        Ok(Transcript {
            text: self.text.clone(),
            confidence: Some(0.93),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_answers_with_fixed_transcript() {
        let transcriber = MockTranscriber::new("patient reports a dry cough");
        let transcript = transcriber
            .transcribe(b"not really audio", "audio/webm", None)
            .await
            .unwrap();
        assert_eq!(transcript.text, "patient reports a dry cough");
        assert!(transcript.confidence.is_some());
    }

    #[tokio::test]
    async fn failing_mock_errors() {
        let transcriber = MockTranscriber::failing();
        assert!(transcriber
            .transcribe(b"bytes", "audio/webm", Some("en"))
            .await
            .is_err());
    }
}
