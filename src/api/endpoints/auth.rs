//! Authentication endpoints: register, login, and the two password-reset
//! flows (emailed link token and 6-digit code).
//!
//! The reset endpoints answer generically whether or not the email exists,
//! so they cannot be used to enumerate accounts.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::auth::{
    self, check_reset_code, hash_password, verify_password, CodeCheck, MIN_PASSWORD_LENGTH,
    RESET_CODE_MAX_ATTEMPTS,
};
use crate::db::repository;
use crate::models::{User, UserProfile, UserRole};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<UserRole>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserProfile,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let ok = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
        .unwrap()
        .is_match(email.trim());
    if ok {
        Ok(())
    } else {
        Err(ApiError::BadRequest("Invalid email address".into()))
    }
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// `POST /auth/register` — create a clinician account and sign them in.
pub async fn register(
    State(ctx): State<ApiContext>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    validate_email(&request.email)?;
    validate_password(&request.password)?;
    if request.first_name.trim().is_empty() || request.last_name.trim().is_empty() {
        return Err(ApiError::BadRequest("First and last name are required".into()));
    }

    let conn = ctx.state.db.connect()?;

    if repository::get_user_by_email(&conn, &request.email)?.is_some() {
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let (salt, hash) = hash_password(&request.password);
    let user = User {
        id: Uuid::new_v4(),
        email: request.email.trim().to_lowercase(),
        password_hash: hash,
        password_salt: salt,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        role: request.role.unwrap_or(UserRole::Doctor),
        is_active: true,
        reset_token: None,
        reset_token_expires_at: None,
        reset_code_hash: None,
        reset_code_expires_at: None,
        reset_code_attempts: 0,
        created_at: Utc::now(),
    };

    // The unique index backstops the pre-check if two registrations race.
    repository::insert_user(&conn, &user).map_err(|e| match e {
        crate::db::DatabaseError::ConstraintViolation(_) => {
            ApiError::Conflict("Email already registered".into())
        }
        other => other.into(),
    })?;

    tracing::info!(user = %user.email, "Registered new user");

    let access_token = ctx.state.jwt.issue(&user)?;
    Ok(Json(AuthResponse {
        access_token,
        user: UserProfile::from(&user),
    }))
}

/// `POST /auth/login` — verify credentials, issue a session token.
pub async fn login(
    State(ctx): State<ApiContext>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let conn = ctx.state.db.connect()?;

    // One generic message for unknown email and wrong password.
    let user = repository::get_user_by_email(&conn, &request.email)?
        .ok_or(ApiError::Unauthorized("Invalid credentials".into()))?;

    if !verify_password(&request.password, &user.password_salt, &user.password_hash) {
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }
    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is deactivated".into()));
    }

    let access_token = ctx.state.jwt.issue(&user)?;
    Ok(Json(AuthResponse {
        access_token,
        user: UserProfile::from(&user),
    }))
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// `POST /auth/forgot-password` — email a reset link token.
pub async fn forgot_password(
    State(ctx): State<ApiContext>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = {
        let conn = ctx.state.db.connect()?;
        match repository::get_user_by_email(&conn, &request.email)? {
            Some(user) if user.is_active => {
                let token = auth::generate_reset_token();
                repository::set_reset_token(&conn, &user.id, &token, auth::token_expiry(Utc::now()))?;
                Some((user, token))
            }
            _ => None,
        }
    };

    if let Some((user, token)) = user {
        let body = format!(
            "A password reset was requested for your account.\n\n\
             Reset token: {token}\n\n\
             The token expires in {} minutes. If you did not request this, \
             ignore this message.",
            auth::RESET_TOKEN_TTL_MINUTES
        );
        if let Err(e) = ctx
            .state
            .mailer
            .send(&user.email, "Password reset", &body)
            .await
        {
            tracing::warn!("Could not send reset email: {e}");
        }
    }

    Ok(MessageResponse::new(
        "If the email is registered, a reset link has been sent",
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// `POST /auth/reset-password` — set a new password using the emailed token.
pub async fn reset_password(
    State(ctx): State<ApiContext>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_password(&request.new_password)?;

    let conn = ctx.state.db.connect()?;
    let user = repository::get_user_by_reset_token(&conn, &request.token)?
        .filter(|u| auth::token_is_usable(u, Utc::now()))
        .ok_or(ApiError::BadRequest("Invalid or expired reset token".into()))?;

    let (salt, hash) = hash_password(&request.new_password);
    repository::set_user_password(&conn, &user.id, &salt, &hash)?;

    tracing::info!(user = %user.email, "Password reset via token");
    Ok(MessageResponse::new("Password has been reset"))
}

#[derive(Deserialize)]
pub struct RequestResetCodeRequest {
    pub email: String,
}

/// `POST /auth/request-reset-code` — email a 6-digit reset code.
pub async fn request_reset_code(
    State(ctx): State<ApiContext>,
    Json(request): Json<RequestResetCodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = {
        let conn = ctx.state.db.connect()?;
        match repository::get_user_by_email(&conn, &request.email)? {
            Some(user) if user.is_active => {
                let code = auth::generate_reset_code();
                repository::set_reset_code(
                    &conn,
                    &user.id,
                    &auth::hash_reset_code(&code),
                    auth::code_expiry(Utc::now()),
                )?;
                Some((user, code))
            }
            _ => None,
        }
    };

    if let Some((user, code)) = user {
        let body = format!(
            "Your password reset code is: {code}\n\n\
             The code expires in {} minutes.",
            auth::RESET_CODE_TTL_MINUTES
        );
        if let Err(e) = ctx
            .state
            .mailer
            .send(&user.email, "Password reset code", &body)
            .await
        {
            tracing::warn!("Could not send reset code email: {e}");
        }
    }

    Ok(MessageResponse::new(
        "If the email is registered, a reset code has been sent",
    ))
}

#[derive(Deserialize)]
pub struct VerifyResetCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct VerifyResetCodeResponse {
    pub valid: bool,
}

/// `POST /auth/verify-reset-code` — check a code without consuming it.
/// Five wrong guesses wipe the code.
pub async fn verify_reset_code(
    State(ctx): State<ApiContext>,
    Json(request): Json<VerifyResetCodeRequest>,
) -> Result<Json<VerifyResetCodeResponse>, ApiError> {
    let conn = ctx.state.db.connect()?;
    let invalid = ApiError::BadRequest("Invalid or expired reset code".into());

    let user = match repository::get_user_by_email(&conn, &request.email)? {
        Some(user) => user,
        None => return Err(invalid),
    };

    match check_reset_code(&user, &request.code, Utc::now()) {
        CodeCheck::Valid => Ok(Json(VerifyResetCodeResponse { valid: true })),
        CodeCheck::Mismatch => {
            repository::record_reset_code_attempt(&conn, &user.id, RESET_CODE_MAX_ATTEMPTS)?;
            Err(invalid)
        }
        CodeCheck::Expired | CodeCheck::NotRequested => Err(invalid),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordWithCodeRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

/// `POST /auth/reset-password-with-code` — set a new password using the
/// emailed 6-digit code.
pub async fn reset_password_with_code(
    State(ctx): State<ApiContext>,
    Json(request): Json<ResetPasswordWithCodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_password(&request.new_password)?;

    let conn = ctx.state.db.connect()?;
    let invalid = ApiError::BadRequest("Invalid or expired reset code".into());

    let user = match repository::get_user_by_email(&conn, &request.email)? {
        Some(user) => user,
        None => return Err(invalid),
    };

    match check_reset_code(&user, &request.code, Utc::now()) {
        CodeCheck::Valid => {
            let (salt, hash) = hash_password(&request.new_password);
            repository::set_user_password(&conn, &user.id, &salt, &hash)?;
            tracing::info!(user = %user.email, "Password reset via code");
            Ok(MessageResponse::new("Password has been reset"))
        }
        CodeCheck::Mismatch => {
            repository::record_reset_code_attempt(&conn, &user.id, RESET_CODE_MAX_ATTEMPTS)?;
            Err(invalid)
        }
        CodeCheck::Expired | CodeCheck::NotRequested => Err(invalid),
    }
}
