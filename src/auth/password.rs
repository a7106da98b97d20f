use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub const PBKDF2_ITERATIONS: u32 = 600_000;
pub const HASH_LENGTH: usize = 32;
pub const SALT_LENGTH: usize = 32;
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Derive the storage hash for a password with the given salt.
fn derive(password: &str, salt: &[u8]) -> [u8; HASH_LENGTH] {
    let mut hash = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut hash);
    hash
}

/// Generate a cryptographically random salt
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Hash a new password under a fresh salt. Returns `(salt, hash)`
/// base64-encoded for storage.
pub fn hash_password(password: &str) -> (String, String) {
    let salt = generate_salt();
    let hash = Zeroizing::new(derive(password, &salt));
    (
        base64::engine::general_purpose::STANDARD.encode(salt),
        base64::engine::general_purpose::STANDARD.encode(hash.as_slice()),
    )
}

/// Verify a password against the stored salt and hash in constant time.
/// Undecodable stored values verify as false rather than erroring.
pub fn verify_password(password: &str, stored_salt: &str, stored_hash: &str) -> bool {
    let salt = match base64::engine::general_purpose::STANDARD.decode(stored_salt) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let expected = match base64::engine::general_purpose::STANDARD.decode(stored_hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    let candidate = Zeroizing::new(derive(password, &salt));
    candidate.as_slice().ct_eq(&expected).unwrap_u8() == 1
}
