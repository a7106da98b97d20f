//! HTTP API.
//!
//! Exposes the clinical record store over HTTP for the web client.
//! Routes are mounted at the root and protected by a middleware stack:
//! Auth → Audit → Handler (`/auth/*` and `/health` skip auth).
//!
//! The router is composable — `api_router()` returns a `Router` that can
//! be mounted on any axum server instance.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::ApiServer;
pub use types::ApiContext;
