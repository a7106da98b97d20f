//! Clinician authentication: PBKDF2 password storage, JWT session tokens,
//! and the two password reset flows (emailed link token and 6-digit code).

pub mod password;
pub mod reset;
pub mod token;

pub use password::*;
pub use reset::*;
pub use token::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token issuance failed: {0}")]
    TokenIssue(String),
}
