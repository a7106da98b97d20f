//! Code search and lookup across the local cache and the coding authority.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::authority::CodingAuthority;
use super::normalize_code;
use crate::db::{repository, Database, DatabaseError};
use crate::models::DiagnosisCode;

/// Fewer local hits than this and the fallback steps run.
pub const MIN_LOCAL_RESULTS: usize = 5;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 50;
/// Queries shorter than this return the popularity list instead of searching.
pub const MIN_QUERY_CHARS: usize = 2;

#[derive(Debug, Serialize)]
pub struct SeedOutcome {
    pub seeded: usize,
    pub skipped: usize,
}

/// Resolves queries and codes against the local cache first, the coding
/// authority second. Owns a database handle rather than a connection so
/// background cache writes can open their own.
pub struct CodeResolver {
    db: Database,
    authority: Option<Arc<dyn CodingAuthority>>,
    /// Cleared permanently the first time a trigram query fails.
    trigram_enabled: AtomicBool,
}

impl CodeResolver {
    pub fn new(
        db: Database,
        authority: Option<Arc<dyn CodingAuthority>>,
        trigram_available: bool,
    ) -> Self {
        Self {
            db,
            authority,
            trigram_enabled: AtomicBool::new(trigram_available),
        }
    }

    /// Layered search. Substring matching first; when that leaves the result
    /// set sparse, trigram, whole-word and any-word passes widen it, and the
    /// coding authority fills whatever is still missing. Authority failures
    /// degrade to whatever the local steps produced.
    pub async fn search(
        &self,
        raw_query: &str,
        limit: usize,
    ) -> Result<Vec<DiagnosisCode>, DatabaseError> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let query = raw_query.trim().to_string();
        let conn = self.db.connect()?;

        if query.chars().count() < MIN_QUERY_CHARS {
            return repository::most_used_codes(&conn, limit as i64);
        }

        let mut results = repository::search_codes_substring(&conn, &query, limit as i64)?;
        if results.len() >= MIN_LOCAL_RESULTS || results.len() >= limit {
            results.truncate(limit);
            return Ok(results);
        }

        let mut seen: HashSet<String> = results.iter().map(|c| c.code.clone()).collect();

        if self.trigram_enabled.load(Ordering::Relaxed) {
            match repository::search_codes_trigram(&conn, &query, limit as i64) {
                Ok(fuzzy) => merge_unique(&mut results, &mut seen, fuzzy, limit),
                Err(e) => {
                    tracing::warn!("Trigram search failed, disabling fuzzy matching: {e}");
                    self.trigram_enabled.store(false, Ordering::Relaxed);
                }
            }
        }

        let tokens: Vec<&str> = query.split_whitespace().collect();
        if results.len() < limit && tokens.len() > 1 {
            let hits = repository::search_codes_all_terms(&conn, &tokens, limit as i64)?;
            merge_unique(&mut results, &mut seen, hits, limit);

            if results.len() < limit {
                let hits = repository::search_codes_any_term(&conn, &tokens, limit as i64)?;
                merge_unique(&mut results, &mut seen, hits, limit);
            }
        }
        drop(conn);

        if results.len() < limit {
            if let Some(authority) = &self.authority {
                match authority.search(&query, limit - results.len()).await {
                    Ok(matches) => {
                        let mut fetched = Vec::new();
                        for found in matches {
                            let code = normalize_code(&found.code);
                            if !seen.insert(code.clone()) {
                                continue;
                            }
                            let row = DiagnosisCode::from_authority(
                                code,
                                found.title,
                                found.chapter,
                            );
                            if results.len() < limit {
                                results.push(row.clone());
                            }
                            fetched.push(row);
                        }
                        self.cache_in_background(fetched);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Coding authority search failed, serving local results: {e}"
                        );
                    }
                }
            }
        }

        results.truncate(limit);
        Ok(results)
    }

    /// Exact lookup. A local hit counts as a use and comes back with its
    /// bumped counters; a miss asks the authority and caches the answer.
    /// Authority failures are logged and reported as not found.
    pub async fn lookup(&self, raw_code: &str) -> Result<Option<DiagnosisCode>, DatabaseError> {
        let code = normalize_code(raw_code);
        let conn = self.db.connect()?;

        if let Some(mut hit) = repository::get_code_by_exact(&conn, &code)? {
            repository::record_code_usage(&conn, &hit.id)?;
            // Reflect the bump without re-reading the row.
            hit.usage_count += 1;
            hit.last_used_at = Some(Utc::now());
            return Ok(Some(hit));
        }
        drop(conn);

        let authority = match &self.authority {
            Some(authority) => authority,
            None => return Ok(None),
        };
        let found = match authority.lookup(&code).await {
            Ok(Some(found)) => found,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!("Coding authority lookup for {code} failed: {e}");
                return Ok(None);
            }
        };

        let row = DiagnosisCode::from_authority(normalize_code(&found.code), found.title, found.chapter);
        self.cache_in_background(vec![row.clone()]);
        Ok(Some(row))
    }

    /// Load the built-in starter set, skipping codes already present.
    pub fn seed(&self) -> Result<SeedOutcome, DatabaseError> {
        let conn = self.db.connect()?;
        let index = self.trigram_enabled.load(Ordering::Relaxed);
        let mut outcome = SeedOutcome {
            seeded: 0,
            skipped: 0,
        };

        for entry in SEED_CODES {
            if repository::code_exists(&conn, entry.0)? {
                outcome.skipped += 1;
                continue;
            }
            let code = seed_row(entry);
            repository::insert_diagnosis_code(&conn, &code)?;
            if index {
                repository::index_code_for_search(&conn, &code)?;
            }
            outcome.seeded += 1;
        }

        tracing::info!(
            seeded = outcome.seeded,
            skipped = outcome.skipped,
            "Seeded diagnosis codes"
        );
        Ok(outcome)
    }

    /// Write authority-fetched codes to the cache without holding up the
    /// response. A conflict means a concurrent request cached the same code
    /// first; that is not an error.
    fn cache_in_background(&self, codes: Vec<DiagnosisCode>) {
        if codes.is_empty() {
            return;
        }
        let db = self.db.clone();
        let index = self.trigram_enabled.load(Ordering::Relaxed);

        tokio::task::spawn_blocking(move || {
            let conn = match db.connect() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Could not open connection to cache fetched codes: {e}");
                    return;
                }
            };
            for code in &codes {
                match repository::insert_diagnosis_code(&conn, code) {
                    Ok(()) => {
                        if index {
                            if let Err(e) = repository::index_code_for_search(&conn, code) {
                                tracing::warn!("Could not index fetched code {}: {e}", code.code);
                            }
                        }
                        tracing::debug!(code = %code.code, "Cached code from coding authority");
                    }
                    Err(DatabaseError::ConstraintViolation(_)) => {
                        tracing::debug!(code = %code.code, "Code already cached, skipping");
                    }
                    Err(e) => {
                        tracing::warn!("Could not cache fetched code {}: {e}", code.code);
                    }
                }
            }
        });
    }
}

fn merge_unique(
    results: &mut Vec<DiagnosisCode>,
    seen: &mut HashSet<String>,
    incoming: Vec<DiagnosisCode>,
    limit: usize,
) {
    for code in incoming {
        if results.len() >= limit {
            return;
        }
        if seen.insert(code.code.clone()) {
            results.push(code);
        }
    }
}

fn seed_row(entry: &SeedEntry) -> DiagnosisCode {
    let (code, chapter, short, long, terms) = *entry;
    DiagnosisCode {
        id: Uuid::new_v4(),
        code: code.to_string(),
        short_description: short.to_string(),
        long_description: long.to_string(),
        chapter: Some(chapter.to_string()),
        category: code.split('.').next().map(str::to_string),
        billable: code.contains('.'),
        usage_count: 0,
        last_used_at: None,
        search_terms: terms.iter().map(|t| t.to_string()).collect(),
        is_active: true,
        created_at: Utc::now(),
    }
}

type SeedEntry = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    &'static [&'static str],
);

/// Starter codes covering common primary-care presentations, so search is
/// useful before the authority has ever been reached.
const SEED_CODES: &[SeedEntry] = &[
    (
        "A09",
        "I",
        "Infectious gastroenteritis and colitis, unspecified",
        "Diarrhoea and gastroenteritis of presumed infectious origin",
        &["gastro", "diarrhea", "food poisoning"],
    ),
    (
        "B34.9",
        "I",
        "Viral infection, unspecified",
        "Viral infection of unspecified site",
        &["viral illness", "viremia"],
    ),
    (
        "E03.9",
        "IV",
        "Hypothyroidism, unspecified",
        "Hypothyroidism, unspecified",
        &["thyroid", "underactive thyroid"],
    ),
    (
        "E11.9",
        "IV",
        "Type 2 diabetes mellitus without complications",
        "Type 2 diabetes mellitus without complications",
        &["diabetes", "t2dm", "dm2"],
    ),
    (
        "E66.9",
        "IV",
        "Obesity, unspecified",
        "Obesity, unspecified",
        &["overweight"],
    ),
    (
        "E78.5",
        "IV",
        "Hyperlipidaemia, unspecified",
        "Hyperlipidaemia, unspecified",
        &["high cholesterol", "dyslipidemia"],
    ),
    (
        "F32.9",
        "V",
        "Depressive episode, unspecified",
        "Major depressive disorder, single episode, unspecified",
        &["depression", "low mood"],
    ),
    (
        "F41.1",
        "V",
        "Generalized anxiety disorder",
        "Generalized anxiety disorder",
        &["anxiety", "gad"],
    ),
    (
        "G43.9",
        "VI",
        "Migraine, unspecified",
        "Migraine, unspecified",
        &["migraine headache"],
    ),
    (
        "I10",
        "IX",
        "Essential (primary) hypertension",
        "Essential (primary) hypertension",
        &["hypertension", "htn", "high blood pressure"],
    ),
    (
        "I48",
        "IX",
        "Atrial fibrillation and flutter",
        "Atrial fibrillation and flutter",
        &["afib", "irregular heartbeat"],
    ),
    (
        "J02.9",
        "X",
        "Acute pharyngitis, unspecified",
        "Acute pharyngitis, unspecified",
        &["sore throat", "pharyngitis"],
    ),
    (
        "J06.9",
        "X",
        "Acute upper respiratory infection, unspecified",
        "Acute upper respiratory infection, unspecified",
        &["uri", "urti", "common cold"],
    ),
    (
        "J18.9",
        "X",
        "Pneumonia, unspecified organism",
        "Pneumonia, unspecified organism",
        &["chest infection"],
    ),
    (
        "J45.9",
        "X",
        "Asthma, unspecified",
        "Asthma, unspecified, uncomplicated",
        &["wheeze", "asthma attack"],
    ),
    (
        "K21.9",
        "XI",
        "Gastro-oesophageal reflux disease without oesophagitis",
        "Gastro-oesophageal reflux disease without oesophagitis",
        &["gerd", "reflux", "heartburn"],
    ),
    (
        "K29.7",
        "XI",
        "Gastritis, unspecified",
        "Gastritis, unspecified, without bleeding",
        &["stomach inflammation"],
    ),
    (
        "M54.5",
        "XIII",
        "Low back pain",
        "Low back pain",
        &["lbp", "backache", "lumbago"],
    ),
    (
        "N39.0",
        "XIV",
        "Urinary tract infection, site not specified",
        "Urinary tract infection, site not specified",
        &["uti", "cystitis"],
    ),
    ("R05", "XVIII", "Cough", "Cough", &[]),
    (
        "R07.4",
        "XVIII",
        "Chest pain, unspecified",
        "Chest pain, unspecified",
        &["chest pain"],
    ),
    (
        "R10.4",
        "XVIII",
        "Other and unspecified abdominal pain",
        "Other and unspecified abdominal pain",
        &["abdominal pain", "stomach ache"],
    ),
    ("R51", "XVIII", "Headache", "Headache", &["cephalgia"]),
    (
        "Z00.0",
        "XXI",
        "General medical examination",
        "Encounter for general adult medical examination",
        &["checkup", "annual exam", "physical"],
    ),
];
