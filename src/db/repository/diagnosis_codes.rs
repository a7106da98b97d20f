use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::DiagnosisCode;

const CODE_COLUMNS: &str = "id, code, short_description, long_description, chapter, category,
     billable, usage_count, last_used_at, search_terms, is_active, created_at";

/// Popularity order: most used first, most recently used breaking ties,
/// code as the stable tail.
const POPULARITY_ORDER: &str = "usage_count DESC, last_used_at IS NULL, last_used_at DESC, code";

pub fn insert_diagnosis_code(conn: &Connection, code: &DiagnosisCode) -> Result<(), DatabaseError> {
    let terms_json = serde_json::to_string(&code.search_terms)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO diagnosis_codes (id, code, short_description, long_description, chapter,
                                      category, billable, usage_count, last_used_at, search_terms,
                                      is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            code.id.to_string(),
            code.code,
            code.short_description,
            code.long_description,
            code.chapter,
            code.category,
            code.billable,
            code.usage_count,
            code.last_used_at,
            terms_json,
            code.is_active,
            code.created_at,
        ],
    )?;
    Ok(())
}

/// Exact-match lookup on the (unique) code column.
pub fn get_code_by_exact(conn: &Connection, code: &str) -> Result<Option<DiagnosisCode>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CODE_COLUMNS} FROM diagnosis_codes WHERE code = ?1 AND is_active = 1"
    ))?;
    let result = stmt.query_row(params![code], row_to_code_row);
    match result {
        Ok(row) => Ok(Some(code_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn code_exists(conn: &Connection, code: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM diagnosis_codes WHERE code = ?1",
        params![code],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Bump the popularity counters after an exact-code hit.
pub fn record_code_usage(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE diagnosis_codes SET usage_count = usage_count + 1, last_used_at = ?2 WHERE id = ?1",
        params![id.to_string(), Utc::now()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "diagnosis_code".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// The most used codes, for short or empty queries.
pub fn most_used_codes(conn: &Connection, limit: i64) -> Result<Vec<DiagnosisCode>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CODE_COLUMNS} FROM diagnosis_codes
         WHERE is_active = 1
         ORDER BY {POPULARITY_ORDER}
         LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit], row_to_code_row)?;
    code_rows_to_vec(rows)
}

/// Substring match across code, descriptions, and the search_terms JSON.
/// An exact code match sorts ahead of everything else.
pub fn search_codes_substring(
    conn: &Connection,
    query: &str,
    limit: i64,
) -> Result<Vec<DiagnosisCode>, DatabaseError> {
    let pattern = super::like_pattern(query);
    let exact = query.trim().to_uppercase();

    let mut stmt = conn.prepare(&format!(
        "SELECT {CODE_COLUMNS} FROM diagnosis_codes
         WHERE is_active = 1
           AND (code LIKE ?1 ESCAPE '\\'
             OR short_description LIKE ?1 ESCAPE '\\'
             OR long_description LIKE ?1 ESCAPE '\\'
             OR search_terms LIKE ?1 ESCAPE '\\')
         ORDER BY CASE WHEN code = ?2 THEN 0 ELSE 1 END, {POPULARITY_ORDER}
         LIMIT ?3"
    ))?;
    let rows = stmt.query_map(params![pattern, exact, limit], row_to_code_row)?;
    code_rows_to_vec(rows)
}

/// Rows where every token appears as a whole word in the code text.
pub fn search_codes_all_terms(
    conn: &Connection,
    tokens: &[&str],
    limit: i64,
) -> Result<Vec<DiagnosisCode>, DatabaseError> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql = format!(
        "SELECT {CODE_COLUMNS} FROM diagnosis_codes WHERE is_active = 1"
    );
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;
    for token in tokens {
        sql.push_str(&format!(
            " AND (code LIKE ?{p} ESCAPE '\\'
                OR short_description LIKE ?{p} ESCAPE '\\'
                OR long_description LIKE ?{p} ESCAPE '\\'
                OR search_terms LIKE ?{p} ESCAPE '\\')",
            p = param_idx
        ));
        params_vec.push(Box::new(super::like_pattern(token)));
        param_idx += 1;
    }
    sql.push_str(&format!(" ORDER BY {POPULARITY_ORDER} LIMIT ?{param_idx}"));
    params_vec.push(Box::new(limit * 4));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), row_to_code_row)?;
    let candidates = code_rows_to_vec(rows)?;

    // LIKE is a substring filter; confirm each token is a whole word.
    let matched = candidates
        .into_iter()
        .filter(|c| {
            let haystack = code_haystack(c);
            tokens.iter().all(|t| contains_word(&haystack, t))
        })
        .take(limit as usize)
        .collect();
    Ok(matched)
}

/// Rows where any token appears as a substring.
pub fn search_codes_any_term(
    conn: &Connection,
    tokens: &[&str],
    limit: i64,
) -> Result<Vec<DiagnosisCode>, DatabaseError> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut clauses = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;
    for token in tokens {
        clauses.push(format!(
            "code LIKE ?{p} ESCAPE '\\'
             OR short_description LIKE ?{p} ESCAPE '\\'
             OR long_description LIKE ?{p} ESCAPE '\\'
             OR search_terms LIKE ?{p} ESCAPE '\\'",
            p = param_idx
        ));
        params_vec.push(Box::new(super::like_pattern(token)));
        param_idx += 1;
    }
    let sql = format!(
        "SELECT {CODE_COLUMNS} FROM diagnosis_codes
         WHERE is_active = 1 AND ({clauses})
         ORDER BY {POPULARITY_ORDER}
         LIMIT ?{param_idx}",
        clauses = clauses.join(" OR ")
    );
    params_vec.push(Box::new(limit));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), row_to_code_row)?;
    code_rows_to_vec(rows)
}

/// Fuzzy search against the trigram FTS index. Errors here are the caller's
/// signal to stop using the index.
pub fn search_codes_trigram(
    conn: &Connection,
    query: &str,
    limit: i64,
) -> Result<Vec<DiagnosisCode>, DatabaseError> {
    let match_expr = match trigram_query(query) {
        Some(expr) => expr,
        None => return Ok(Vec::new()),
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT dc.id, dc.code, dc.short_description, dc.long_description, dc.chapter,
                dc.category, dc.billable, dc.usage_count, dc.last_used_at, dc.search_terms,
                dc.is_active, dc.created_at
         FROM diagnosis_codes_fts f
         JOIN diagnosis_codes dc ON dc.rowid = f.rowid
         WHERE diagnosis_codes_fts MATCH ?1 AND dc.is_active = 1
         ORDER BY rank
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![match_expr, limit], row_to_code_row)?;
    code_rows_to_vec(rows)
}

/// Mirror a code into the trigram index, keyed by the base table rowid.
pub fn index_code_for_search(conn: &Connection, code: &DiagnosisCode) -> Result<(), DatabaseError> {
    let rowid: Option<i64> = conn
        .query_row(
            "SELECT rowid FROM diagnosis_codes WHERE id = ?1",
            params![code.id.to_string()],
            |row| row.get(0),
        )
        .ok();

    let rowid = match rowid {
        Some(r) => r,
        None => {
            return Err(DatabaseError::NotFound {
                entity_type: "diagnosis_code".into(),
                id: code.id.to_string(),
            })
        }
    };

    let terms_json = serde_json::to_string(&code.search_terms)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    conn.execute(
        "DELETE FROM diagnosis_codes_fts WHERE rowid = ?1",
        params![rowid],
    )?;
    conn.execute(
        "INSERT INTO diagnosis_codes_fts (rowid, code, short_description, long_description, search_terms)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            rowid,
            code.code,
            code.short_description,
            code.long_description,
            terms_json,
        ],
    )?;
    Ok(())
}

pub fn count_diagnosis_codes(conn: &Connection) -> Result<i64, DatabaseError> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM diagnosis_codes", [], |row| row.get(0))?;
    Ok(count)
}

/// Build a trigram MATCH expression: each term of three or more characters
/// becomes a quoted phrase, OR-joined. Returns None when nothing is long
/// enough to produce a trigram.
fn trigram_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric() || *c == '.')
                .collect::<String>()
        })
        .filter(|t| t.chars().count() >= 3)
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn code_haystack(code: &DiagnosisCode) -> String {
    let mut haystack = format!(
        "{} {} {}",
        code.code, code.short_description, code.long_description
    );
    for term in &code.search_terms {
        haystack.push(' ');
        haystack.push_str(term);
    }
    haystack
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w.eq_ignore_ascii_case(word))
}

struct CodeRow {
    id: String,
    code: String,
    short_description: String,
    long_description: String,
    chapter: Option<String>,
    category: Option<String>,
    billable: bool,
    usage_count: i64,
    last_used_at: Option<DateTime<Utc>>,
    search_terms: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

fn row_to_code_row(row: &rusqlite::Row) -> rusqlite::Result<CodeRow> {
    Ok(CodeRow {
        id: row.get(0)?,
        code: row.get(1)?,
        short_description: row.get(2)?,
        long_description: row.get(3)?,
        chapter: row.get(4)?,
        category: row.get(5)?,
        billable: row.get(6)?,
        usage_count: row.get(7)?,
        last_used_at: row.get(8)?,
        search_terms: row.get(9)?,
        is_active: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn code_from_row(row: CodeRow) -> Result<DiagnosisCode, DatabaseError> {
    Ok(DiagnosisCode {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        code: row.code,
        short_description: row.short_description,
        long_description: row.long_description,
        chapter: row.chapter,
        category: row.category,
        billable: row.billable,
        usage_count: row.usage_count,
        last_used_at: row.last_used_at,
        search_terms: serde_json::from_str(&row.search_terms)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        is_active: row.is_active,
        created_at: row.created_at,
    })
}

fn code_rows_to_vec(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<CodeRow>>,
) -> Result<Vec<DiagnosisCode>, DatabaseError> {
    let mut codes = Vec::new();
    for row in rows {
        codes.push(code_from_row(row?)?);
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigram_query_quotes_terms() {
        assert_eq!(
            trigram_query("diabetes mellitus"),
            Some("\"diabetes\" OR \"mellitus\"".into())
        );
        assert_eq!(trigram_query("E11.9"), Some("\"E11.9\"".into()));
    }

    #[test]
    fn trigram_query_drops_short_terms() {
        assert_eq!(trigram_query("of dm"), None);
        assert_eq!(trigram_query("dm gerd"), Some("\"gerd\"".into()));
    }

    #[test]
    fn trigram_query_strips_quotes() {
        assert_eq!(trigram_query("\"asthma\""), Some("\"asthma\"".into()));
    }

    #[test]
    fn whole_word_matching() {
        assert!(contains_word("Type 2 diabetes mellitus", "diabetes"));
        assert!(contains_word("Low back pain", "PAIN"));
        assert!(!contains_word("hypertension", "tension"));
    }
}
