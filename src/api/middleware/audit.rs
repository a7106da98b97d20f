//! Access logging middleware.
//!
//! Logs every request with method, path, response status and the acting
//! user. Runs innermost, after auth has injected `CurrentUser`.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::CurrentUser;

/// Log the request for the access trail.
pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let user = req
        .extensions()
        .get::<CurrentUser>()
        .map(|u| u.email.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let response = next.run(req).await;

    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        %user,
        "API request"
    );

    response
}
