use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cached ICD-10 diagnosis code.
///
/// Rows originate from the seed set or from coding-authority fetches.
/// `usage_count` and `last_used_at` are bumped on exact-code hits and drive
/// popularity ordering in search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisCode {
    pub id: Uuid,
    pub code: String,
    pub short_description: String,
    pub long_description: String,
    pub chapter: Option<String>,
    pub category: Option<String>,
    pub billable: bool,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Synonyms and abbreviations matched during search.
    pub search_terms: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DiagnosisCode {
    /// Build a fresh cache row for a code fetched from the coding authority.
    pub fn from_authority(code: String, title: String, chapter: Option<String>) -> Self {
        let category = code.split('.').next().map(str::to_string);
        // Subcategory codes (with a decimal part) are the billable ones.
        let billable = code.contains('.');
        Self {
            id: Uuid::new_v4(),
            code,
            short_description: title.clone(),
            long_description: title,
            chapter,
            category,
            billable,
            usage_count: 0,
            last_used_at: None,
            search_terms: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
