//! Outbound email for the password-reset flows.
//!
//! Delivery goes through an HTTP mail API. When no provider is configured the
//! [`LogMailer`] stands in, so reset requests still complete and the message
//! lands in the logs instead of an inbox.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::MailConfig;

const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Could not reach mail provider at {0}")]
    Connection(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Mail provider returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Sends plain-text mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Client for a JSON mail API.
pub struct HttpMailer {
    api_url: String,
    api_key: String,
    from: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OutboundMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpMailer {
    pub fn new(config: &MailConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            client,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message = OutboundMail {
            from: &self.from,
            to,
            subject,
            text: body,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    MailError::Connection(self.api_url.clone())
                } else if e.is_timeout() {
                    MailError::Http(format!(
                        "Request timed out after {REQUEST_TIMEOUT_SECS} seconds"
                    ))
                } else {
                    MailError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Fallback mailer that logs instead of sending. The message body is not
/// logged; reset tokens and codes must not end up in log files.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
        tracing::info!(to, subject, "Mail provider not configured, dropping message");
        Ok(())
    }
}

/// Mock mailer capturing every message, for testing the reset flows
/// end to end.
#[derive(Default)]
pub struct MockMailer {
    sent: std::sync::Mutex<Vec<SentMail>>,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_captures_messages_in_order() {
        let mailer = MockMailer::new();
        mailer
            .send("a@clinic.test", "First", "one")
            .await
            .unwrap();
        mailer
            .send("b@clinic.test", "Second", "two")
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "a@clinic.test");
        assert_eq!(sent[1].subject, "Second");
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        assert!(LogMailer
            .send("anyone@clinic.test", "Hello", "body")
            .await
            .is_ok());
    }
}
