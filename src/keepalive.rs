//! Periodic self-ping.
//!
//! Free-tier hosts idle out instances that receive no traffic; a request
//! against our own health endpoint every few minutes keeps the instance warm.

use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Ping `url` every `every`. The first interval tick is consumed before the
/// loop starts so the server has time to come up; failures are logged and the
/// next tick retries.
pub fn spawn_keepalive(url: String, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match client.get(&url).send().await {
                Ok(response) => {
                    tracing::debug!(status = %response.status(), "Keepalive ping");
                }
                Err(e) => {
                    tracing::warn!("Keepalive ping failed: {e}");
                }
            }
        }
    })
}
