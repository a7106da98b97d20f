//! Shared types for the API layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Claims;
use crate::models::UserRole;
use crate::state::AppState;

/// List endpoints cap page size here no matter what the client asks for.
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 20;

// ═══════════════════════════════════════════════════════════
// API context — shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<AppState>,
}

impl ApiContext {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

// ═══════════════════════════════════════════════════════════
// Current user — injected by auth middleware
// ═══════════════════════════════════════════════════════════

/// Authenticated clinician, injected into request extensions by the auth
/// middleware after the session token checks out.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl CurrentUser {
    /// Rebuild the user from verified claims. `None` means the token payload
    /// is structurally wrong, which only happens for tokens we never issued.
    pub fn from_claims(claims: &Claims) -> Option<Self> {
        let id = Uuid::parse_str(&claims.sub).ok()?;
        let role = claims.role.parse::<UserRole>().ok()?;
        Some(Self {
            id,
            email: claims.email.clone(),
            name: claims.name.clone(),
            role,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Pagination envelope
// ═══════════════════════════════════════════════════════════

/// Page selection as sent by clients. Out-of-range values are clamped, not
/// rejected.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    /// Effective `(page, limit)` for repository calls.
    pub fn normalize(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, limit)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PageMeta {
    pub fn new(total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + limit - 1) / limit
        };
        Self {
            total,
            page,
            limit,
            total_pages,
            has_next_page: page < total_pages,
            has_previous_page: page > 1 && total_pages > 0,
        }
    }
}

/// Standard list envelope: `{data, meta}`.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        Self {
            data,
            meta: PageMeta::new(total, page, limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_defaults_and_clamps() {
        let (page, limit) = PageQuery::default().normalize();
        assert_eq!((page, limit), (1, DEFAULT_PAGE_SIZE));

        let q = PageQuery {
            page: Some(0),
            limit: Some(10_000),
        };
        assert_eq!(q.normalize(), (1, MAX_PAGE_SIZE));

        let q = PageQuery {
            page: Some(-3),
            limit: Some(0),
        };
        assert_eq!(q.normalize(), (1, 1));
    }

    #[test]
    fn meta_counts_pages() {
        let meta = PageMeta::new(45, 2, 20);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next_page);
        assert!(meta.has_previous_page);

        let last = PageMeta::new(45, 3, 20);
        assert!(!last.has_next_page);
        assert!(last.has_previous_page);
    }

    #[test]
    fn meta_for_empty_results() {
        let meta = PageMeta::new(0, 1, 20);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next_page);
        assert!(!meta.has_previous_page);
    }

    #[test]
    fn meta_exact_page_boundary() {
        let meta = PageMeta::new(40, 2, 20);
        assert_eq!(meta.total_pages, 2);
        assert!(!meta.has_next_page);
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let page: Paginated<i32> = Paginated::new(vec![1, 2], 2, 1, 20);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["meta"]["totalPages"], 1);
        assert_eq!(json["meta"]["hasNextPage"], false);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
    }
}
