//! Bearer-token authentication.
//!
//! Tokens are accepted from the `Authorization: Bearer` header or from the
//! `token` cookie set by the web client.

pub mod jwt;
pub mod password;

pub use jwt::JwtManager;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;
use crate::models::{AccountStatus, User};
use crate::AppState;

/// Cookie name carrying the token.
pub const TOKEN_COOKIE: &str = "token";

/// The authenticated user, resolved from the token by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

/// Find the token in the request headers.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|s| !s.is_empty())
}

/// Reject requests without a valid token for an active account.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing authentication token".to_string()))?;

    let claims = state.jwt.validate(&token).map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        AppError::Unauthorized("Invalid or expired token".to_string())
    })?;

    let user = state
        .repo
        .get_user(&claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Unknown user".to_string()))?;

    if user.status != AccountStatus::Active {
        return Err(AppError::Forbidden("Account is not active".to_string()));
    }

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

/// Reject authenticated users without the admin flag. Must run after [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    match request.extensions().get::<CurrentUser>() {
        Some(CurrentUser(user)) if user.is_admin => Ok(next.run(request).await),
        Some(_) => Err(AppError::Forbidden(
            "Administrator privileges required".to_string(),
        )),
        None => Err(AppError::Unauthorized(
            "Authentication required".to_string(),
        )),
    }
}

/// Allow the user themselves or an administrator.
pub fn ensure_self_or_admin(current: &User, user_id: &str) -> Result<(), AppError> {
    if current.is_admin || current.id == user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You can only access your own account".to_string(),
        ))
    }
}
