use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{patch, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

use super::dto::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, PublicUser,
    ResetPasswordRequest, SignupRequest, UpdatePasswordRequest,
};
use super::extractors::CurrentUser;
use super::jwt::JwtKeys;
use super::password::{hash_password, validate_strength, verify_password};
use super::repo::{generate_reset_token, reset_token_digest, UserRepo};
use super::user::User;

/// Reset tokens die after ten minutes.
const RESET_TOKEN_TTL_SECS: i64 = 10 * 60;

/// Whatever the outcome, forgot-password answers with this, so the response
/// never discloses whether an email is registered.
const FORGOT_RESPONSE: &str = "If that account exists, a reset token has been sent to its email";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:token", patch(reset_password))
        .route("/auth/change-password", patch(update_password))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn required(value: Option<String>, message: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::validation(message))
}

fn validate_new_password(password: &str, confirm: &str) -> ApiResult<()> {
    if password != confirm {
        return Err(ApiError::validation("Passwords are not the same"));
    }
    validate_strength(password)
}

fn issue_token(state: &AppState, user: &User) -> ApiResult<AuthResponse> {
    let keys = JwtKeys::from_ref(state);
    let token = keys.sign(user.id).map_err(ApiError::Internal)?;
    Ok(AuthResponse {
        token,
        user: PublicUser::from(user),
    })
}

/// Stamped one second in the past so the token issued together with the
/// change stays valid while every earlier token fails the changed-at check.
fn password_changed_stamp() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp() - 1
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let name = required(payload.name, "Please provide a name")?;
    let email = required(payload.email, "Please provide an email address")?
        .trim()
        .to_lowercase();
    let password = required(payload.password, "Please provide a password")?;
    let confirm = required(payload.password_confirm, "Please confirm the password")?;

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::validation("Invalid email"));
    }
    validate_new_password(&password, &confirm)?;

    let repo = UserRepo::new(state.store.as_ref());
    if repo
        .find_by_email(&email)
        .await
        .map_err(ApiError::Internal)?
        .is_some()
    {
        warn!(email = %email, "email already registered");
        return Err(ApiError::validation("Email already registered"));
    }

    // hash before anything is persisted; plaintext never reaches the store
    let hash = hash_password(&password).map_err(ApiError::Internal)?;
    let user = repo
        .create(name.trim(), &email, &hash, payload.role.unwrap_or_default())
        .await
        .map_err(ApiError::Internal)?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((StatusCode::CREATED, Json(issue_token(&state, &user)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let (Some(email), Some(password)) = (payload.email, payload.password) else {
        return Err(ApiError::validation("Please provide email and password"));
    };
    let email = email.trim().to_lowercase();

    let repo = UserRepo::new(state.store.as_ref());
    let user = repo
        .find_by_email(&email)
        .await
        .map_err(ApiError::Internal)?
        .filter(|u| u.active);

    // unknown email and wrong password must stay indistinguishable
    let correct = match &user {
        Some(u) => verify_password(&password, &u.password_hash).map_err(ApiError::Internal)?,
        None => false,
    };
    let Some(user) = user.filter(|_| correct) else {
        warn!(email = %email, "failed login attempt");
        return Err(ApiError::authentication("Incorrect email or password"));
    };

    info!(user_id = %user.id, "user logged in");
    Ok(Json(issue_token(&state, &user)?))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = required(payload.email, "Please provide an email address")?
        .trim()
        .to_lowercase();

    let repo = UserRepo::new(state.store.as_ref());
    let Some(user) = repo
        .find_by_email(&email)
        .await
        .map_err(ApiError::Internal)?
        .filter(|u| u.active)
    else {
        debug!(email = %email, "password reset requested for unknown email");
        return Ok(Json(MessageResponse::new(FORGOT_RESPONSE)));
    };

    let (raw_token, digest) = generate_reset_token();
    let expires_at = OffsetDateTime::now_utc().unix_timestamp() + RESET_TOKEN_TTL_SECS;
    repo.set_reset_token(user.id, &digest, expires_at)
        .await
        .map_err(ApiError::Internal)?;

    let reset_url = format!(
        "{}/api/v1/auth/reset-password/{}",
        state.config.base_url, raw_token
    );
    let body = format!(
        "Forgot your password? Submit a PATCH request with your new password and \
         password confirmation to {reset_url}.\n\
         If you didn't forget your password, please ignore this email."
    );
    if let Err(e) = state
        .mailer
        .send(
            &user.email,
            "Your password reset token (valid for 10 minutes)",
            &body,
        )
        .await
    {
        warn!(user_id = %user.id, error = %e, "reset email dispatch failed, rolling back token");
        // a token that was never delivered must not stay usable
        repo.clear_reset_token(user.id)
            .await
            .map_err(ApiError::Internal)?;
        return Err(ApiError::delivery(
            "There was an error sending the email. Try again later.",
        ));
    }

    info!(user_id = %user.id, "password reset token sent");
    Ok(Json(MessageResponse::new(FORGOT_RESPONSE)))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let repo = UserRepo::new(state.store.as_ref());
    let digest = reset_token_digest(&token);
    let now = OffsetDateTime::now_utc().unix_timestamp();

    // mismatch and expiry are deliberately the same failure
    let user = repo
        .find_by_reset_hash(&digest)
        .await
        .map_err(ApiError::Internal)?
        .filter(|u| u.password_reset_hash.as_deref() == Some(digest.as_str()))
        .filter(|u| u.password_reset_expires.is_some_and(|exp| exp > now));
    let Some(user) = user else {
        warn!("password reset with invalid or expired token");
        return Err(ApiError::authentication("Token is invalid or has expired"));
    };

    let password = required(payload.password, "Please provide a password")?;
    let confirm = required(payload.password_confirm, "Please confirm the password")?;
    validate_new_password(&password, &confirm)?;

    let hash = hash_password(&password).map_err(ApiError::Internal)?;
    repo.set_password(user.id, &hash, password_changed_stamp())
        .await
        .map_err(ApiError::Internal)?;

    info!(user_id = %user.id, "password reset");
    Ok(Json(issue_token(&state, &user)?))
}

#[instrument(skip(state, current, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = current.0;
    let current_password = payload
        .current_password
        .ok_or_else(|| ApiError::validation("Please provide current password"))?;

    if !verify_password(&current_password, &user.password_hash).map_err(ApiError::Internal)? {
        warn!(user_id = %user.id, "password change with wrong current password");
        return Err(ApiError::authentication("Your current password is wrong"));
    }

    let password = required(payload.password, "Please provide a password")?;
    let confirm = required(payload.password_confirm, "Please confirm the password")?;
    validate_new_password(&password, &confirm)?;

    let repo = UserRepo::new(state.store.as_ref());
    let hash = hash_password(&password).map_err(ApiError::Internal)?;
    repo.set_password(user.id, &hash, password_changed_stamp())
        .await
        .map_err(ApiError::Internal)?;

    info!(user_id = %user.id, "password changed");
    Ok(Json(issue_token(&state, &user)?))
}
