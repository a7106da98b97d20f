//! ICD-10 diagnosis code resolution.
//!
//! Search and lookup run against the local cache first and fall back to the
//! external coding authority; everything fetched is cached for next time.

pub mod authority;
pub mod resolver;

pub use authority::{AuthorityCode, AuthorityError, CodingAuthority, WhoApiClient};
pub use resolver::{CodeResolver, SeedOutcome};

use regex::Regex;

/// Canonical form for a raw code: trimmed and uppercased.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Structural check only: one letter, two digits, optional one or two digit
/// subcategory after a dot. Says nothing about whether the code exists.
pub fn is_valid_code_format(code: &str) -> bool {
    Regex::new(r"^[A-Z][0-9]{2}(\.[0-9]{1,2})?$")
        .unwrap()
        .is_match(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_category_and_subcategory_codes() {
        for code in ["A09", "I10", "E11.9", "M54.5", "Z00.0", "J06.99"] {
            assert!(is_valid_code_format(code), "expected {code} to validate");
        }
    }

    #[test]
    fn rejects_malformed_codes() {
        for code in ["", "e11.9", "E119", "11.9", "E1.9", "E11.999", "E11.", "AB1.2", " I10"] {
            assert!(!is_valid_code_format(code), "expected {code} to fail");
        }
    }

    #[test]
    fn normalization_uppercases_and_trims() {
        assert_eq!(normalize_code("  e11.9 "), "E11.9");
        assert!(is_valid_code_format(&normalize_code("  e11.9 ")));
    }
}
