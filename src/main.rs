//! Charta server binary: read config, build state, start background tasks,
//! serve until interrupted.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use charta::api::{self, ApiContext};
use charta::config::{self, Config};
use charta::icd::authority::spawn_token_refresh;
use charta::keepalive::spawn_keepalive;
use charta::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("Charta starting v{}", config::APP_VERSION);

    let config = Config::from_env();
    let bind_addr = config.bind_addr;

    let state = match AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!("Startup failed: {e}");
            std::process::exit(1);
        }
    };

    // Keep the coding-authority token warm so the first search does not pay
    // the OAuth round trip.
    if let Some(authority) = state.authority.clone() {
        spawn_token_refresh(authority, state.config.icd_token_refresh);
    }

    if let Some(keepalive) = &state.config.keepalive {
        spawn_keepalive(keepalive.url.clone(), keepalive.every);
    }

    let mut server = match api::server::start(ApiContext::new(state), bind_addr).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Could not listen for shutdown signal: {e}");
    }

    tracing::info!("Shutting down");
    server.shutdown();
    server.wait().await;
}
