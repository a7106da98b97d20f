//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <token>`, verifies the JWT, and injects
//! [`CurrentUser`] into request extensions for downstream handlers.
//!
//! Claims are trusted as-is; the user row is not reloaded per request, so a
//! role change or rename takes effect at the next login. Deactivation is
//! caught at login, not here.

use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, CurrentUser};

/// Require a valid session token on the request.
///
/// Accesses `ApiContext` from request extensions (injected by the Extension
/// layer). On success: injects `CurrentUser` and marks the response
/// uncacheable.
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized("Authentication required".into()))?
        .to_string();

    let claims = ctx
        .state
        .jwt
        .verify(&token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

    let user = CurrentUser::from_claims(&claims)
        .ok_or(ApiError::Unauthorized("Invalid or expired token".into()))?;

    req.extensions_mut().insert(user);

    let mut response = next.run(req).await;

    // Clinical data must never land in shared caches.
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));

    Ok(response)
}
