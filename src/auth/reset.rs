use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::User;

pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;
pub const RESET_CODE_TTL_MINUTES: i64 = 15;
pub const RESET_CODE_MAX_ATTEMPTS: i64 = 5;

/// Opaque token for the emailed reset link (URL-safe base64, 32 bytes of
/// entropy). Stored as-is; possession is the proof.
pub fn generate_reset_token() -> String {
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Six-digit reset code, zero-padded.
pub fn generate_reset_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

/// Codes are never stored in the clear; only this digest is.
pub fn hash_reset_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

pub fn token_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(RESET_TOKEN_TTL_MINUTES)
}

pub fn code_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(RESET_CODE_TTL_MINUTES)
}

/// Whether the emailed link token on this user is still usable.
pub fn token_is_usable(user: &User, now: DateTime<Utc>) -> bool {
    user.reset_token.is_some()
        && matches!(user.reset_token_expires_at, Some(expires) if expires > now)
}

#[derive(Debug, PartialEq, Eq)]
pub enum CodeCheck {
    Valid,
    /// Wrong digits. The caller must record the failed attempt.
    Mismatch,
    Expired,
    /// No outstanding code, either never requested or already invalidated.
    NotRequested,
}

/// Evaluate a candidate code against the user's stored reset state. Pure;
/// attempt counting and invalidation are the repository's job.
pub fn check_reset_code(user: &User, candidate: &str, now: DateTime<Utc>) -> CodeCheck {
    let stored = match &user.reset_code_hash {
        Some(hash) => hash,
        None => return CodeCheck::NotRequested,
    };
    if user.reset_code_attempts >= RESET_CODE_MAX_ATTEMPTS {
        return CodeCheck::NotRequested;
    }
    match user.reset_code_expires_at {
        Some(expires) if expires > now => {}
        _ => return CodeCheck::Expired,
    }

    let candidate_hash = hash_reset_code(candidate.trim());
    if candidate_hash
        .as_bytes()
        .ct_eq(stored.as_bytes())
        .unwrap_u8()
        == 1
    {
        CodeCheck::Valid
    } else {
        CodeCheck::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::models::enums::UserRole;

    fn user_with_code(code: &str, expires_in_minutes: i64, attempts: i64) -> User {
        User {
            id: Uuid::new_v4(),
            email: "dana@charta.test".into(),
            password_hash: String::new(),
            password_salt: String::new(),
            first_name: "Dana".into(),
            last_name: "Osei".into(),
            role: UserRole::Doctor,
            is_active: true,
            reset_token: None,
            reset_token_expires_at: None,
            reset_code_hash: Some(hash_reset_code(code)),
            reset_code_expires_at: Some(Utc::now() + Duration::minutes(expires_in_minutes)),
            reset_code_attempts: attempts,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_reset_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn correct_code_is_valid() {
        let user = user_with_code("123456", 10, 0);
        assert_eq!(check_reset_code(&user, "123456", Utc::now()), CodeCheck::Valid);
        // Leading and trailing whitespace is tolerated
        assert_eq!(
            check_reset_code(&user, " 123456 ", Utc::now()),
            CodeCheck::Valid
        );
    }

    #[test]
    fn wrong_code_is_mismatch() {
        let user = user_with_code("123456", 10, 0);
        assert_eq!(
            check_reset_code(&user, "654321", Utc::now()),
            CodeCheck::Mismatch
        );
    }

    #[test]
    fn expired_code_is_rejected_even_when_correct() {
        let user = user_with_code("123456", -1, 0);
        assert_eq!(
            check_reset_code(&user, "123456", Utc::now()),
            CodeCheck::Expired
        );
    }

    #[test]
    fn exhausted_attempts_behave_like_no_code() {
        let user = user_with_code("123456", 10, RESET_CODE_MAX_ATTEMPTS);
        assert_eq!(
            check_reset_code(&user, "123456", Utc::now()),
            CodeCheck::NotRequested
        );
    }

    #[test]
    fn missing_code_is_not_requested() {
        let mut user = user_with_code("123456", 10, 0);
        user.reset_code_hash = None;
        assert_eq!(
            check_reset_code(&user, "123456", Utc::now()),
            CodeCheck::NotRequested
        );
    }

    #[test]
    fn reset_tokens_are_unique() {
        assert_ne!(generate_reset_token(), generate_reset_token());
    }

    #[test]
    fn token_usability_tracks_expiry() {
        let mut user = user_with_code("123456", 10, 0);
        assert!(!token_is_usable(&user, Utc::now()));
        user.reset_token = Some(generate_reset_token());
        user.reset_token_expires_at = Some(token_expiry(Utc::now()));
        assert!(token_is_usable(&user, Utc::now()));
        user.reset_token_expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(!token_is_usable(&user, Utc::now()));
    }
}
