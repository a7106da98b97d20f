//! External ICD-10 coding authority client.
//!
//! Speaks the WHO ICD API shape: OAuth2 client-credentials token endpoint,
//! then bearer-authenticated search and entity lookups against a release.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::AuthorityConfig;

/// Tokens are refreshed this many seconds before their stated expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Could not reach coding authority at {0}")]
    Connection(String),

    #[error("Token request failed: {0}")]
    Token(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Coding authority returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse authority response: {0}")]
    ResponseParsing(String),
}

/// A code as the authority reports it, before it becomes a cached
/// [`DiagnosisCode`](crate::models::DiagnosisCode).
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityCode {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub chapter: Option<String>,
}

/// Search and lookup against an external coding authority.
#[async_trait]
pub trait CodingAuthority: Send + Sync {
    /// Free-text search, best matches first.
    async fn search(&self, query: &str, limit: usize)
        -> Result<Vec<AuthorityCode>, AuthorityError>;

    /// Exact lookup of a single code. `Ok(None)` when the authority does not
    /// know the code.
    async fn lookup(&self, code: &str) -> Result<Option<AuthorityCode>, AuthorityError>;
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Client for a WHO-style ICD API.
pub struct WhoApiClient {
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    release: String,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: Vec<AuthorityCode>,
}

impl WhoApiClient {
    pub fn new(config: &AuthorityConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            release: config.release.clone(),
            client,
            token: Mutex::new(None),
        }
    }

    /// Current bearer token, fetching a fresh one when the cache is empty or
    /// inside the refresh margin. The fetch itself runs outside the lock, so
    /// two callers arriving on an expired cache may both hit the token
    /// endpoint; the later store wins and both tokens are valid.
    async fn bearer(&self) -> Result<String, AuthorityError> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        {
            let guard = self.token.lock().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at - margin > Utc::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *self.token.lock().await = Some(fresh);
        Ok(access_token)
    }

    /// Unconditionally fetch and cache a new token. Called by the background
    /// refresh loop so interactive searches rarely pay the token round trip.
    pub async fn refresh_token(&self) -> Result<(), AuthorityError> {
        let fresh = self.fetch_token().await?;
        *self.token.lock().await = Some(fresh);
        Ok(())
    }

    async fn fetch_token(&self) -> Result<CachedToken, AuthorityError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "icdapi_access"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthorityError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Token(format!("{status}: {body}")));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthorityError::ResponseParsing(e.to_string()))?;

        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at: Utc::now() + Duration::seconds(parsed.expires_in),
        })
    }

    fn request_error(&self, e: reqwest::Error) -> AuthorityError {
        if e.is_connect() {
            AuthorityError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            AuthorityError::Http(format!(
                "Request timed out after {REQUEST_TIMEOUT_SECS} seconds"
            ))
        } else {
            AuthorityError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl CodingAuthority for WhoApiClient {
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<AuthorityCode>, AuthorityError> {
        let token = self.bearer().await?;
        let url = format!("{}/release/10/{}/search", self.base_url, self.release);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("Accept-Language", "en")
            .query(&[("q", query), ("limit", limit.to_string().as_str())])
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AuthorityError::ResponseParsing(e.to_string()))?;

        Ok(parsed.matches.into_iter().take(limit).collect())
    }

    async fn lookup(&self, code: &str) -> Result<Option<AuthorityCode>, AuthorityError> {
        let token = self.bearer().await?;
        let url = format!("{}/release/10/{}/{}", self.base_url, self.release, code);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("Accept-Language", "en")
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AuthorityCode = response
            .json()
            .await
            .map_err(|e| AuthorityError::ResponseParsing(e.to_string()))?;

        Ok(Some(parsed))
    }
}

/// Periodically refresh the authority token. Failures are logged and retried
/// on the next tick; the first tick fires immediately, warming the cache at
/// startup.
pub fn spawn_token_refresh(
    client: std::sync::Arc<WhoApiClient>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match client.refresh_token().await {
                Ok(()) => tracing::debug!("Refreshed coding authority token"),
                Err(e) => tracing::warn!("Coding authority token refresh failed: {e}"),
            }
        }
    })
}

/// Mock authority for testing, serving a fixed set of codes.
pub struct MockAuthority {
    codes: Vec<AuthorityCode>,
    fail: bool,
}

impl MockAuthority {
    pub fn new(codes: Vec<AuthorityCode>) -> Self {
        Self { codes, fail: false }
    }

    /// A mock whose every call fails, for testing degraded paths.
    pub fn failing() -> Self {
        Self {
            codes: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl CodingAuthority for MockAuthority {
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<AuthorityCode>, AuthorityError> {
        if self.fail {
            return Err(AuthorityError::Connection("mock authority".to_string()));
        }
        let needle = query.to_lowercase();
        Ok(self
            .codes
            .iter()
            .filter(|c| {
                c.code.to_lowercase().contains(&needle)
                    || c.title.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn lookup(&self, code: &str) -> Result<Option<AuthorityCode>, AuthorityError> {
        if self.fail {
            return Err(AuthorityError::Connection("mock authority".to_string()));
        }
        Ok(self.codes.iter().find(|c| c.code == code).cloned())
    }
}
