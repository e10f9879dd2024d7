//! Signup and login endpoints.

use axum::extract::State;

use super::{success, ApiResult, Json};
use crate::auth::password::{
    hash_password_async, verify_password_async, MIN_PASSWORD_LEN,
};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::models::{AccountStatus, LoginRequest, LoginResponse, RegisterRequest, User};
use crate::AppState;

/// POST /api/auth/register - Request an account. It stays pending until an admin approves it.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<User> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(AppError::Validation("Username is required".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let email = request
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());
    if email.is_some_and(|e| !e.contains('@')) {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }

    let hash = hash_password_async(request.password).await?;
    let user = state
        .repo
        .create_user(username, email, &hash, AccountStatus::Pending, false)
        .await?;

    tracing::info!(user = %user.username, "Signup awaiting approval");
    success(user)
}

/// POST /api/auth/login - Exchange credentials for a bearer token.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let invalid = || AppError::Unauthorized("Invalid username or password".to_string());

    let (user, hash) = state
        .repo
        .get_user_credentials(request.username.trim())
        .await?
        .ok_or_else(invalid)?;

    if !verify_password_async(request.password, hash).await? {
        tracing::debug!(user = %user.username, "Wrong password");
        return Err(invalid());
    }

    match user.status {
        AccountStatus::Active => {}
        AccountStatus::Pending => {
            return Err(AppError::Forbidden(
                "Account is awaiting approval".to_string(),
            ))
        }
        AccountStatus::Rejected => {
            return Err(AppError::Forbidden("Account was rejected".to_string()))
        }
    }

    let (token, expires_in) = state.jwt.issue(&user)?;
    success(LoginResponse {
        token,
        token_type: "Bearer",
        expires_in,
        user,
    })
}

/// GET /api/auth/me - The authenticated user.
pub async fn me(CurrentUser(user): CurrentUser) -> ApiResult<User> {
    success(user)
}
