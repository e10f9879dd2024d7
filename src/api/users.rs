//! User administration, signup review and leaderboard endpoints.

use axum::extract::{Path, State};
use serde::Deserialize;

use super::{success, ApiResult, Json, Query};
use crate::auth::{ensure_self_or_admin, CurrentUser};
use crate::errors::AppError;
use crate::models::{AccountStatus, Cycle, LeaderboardEntry, UpdateUserRequest, User};
use crate::AppState;

const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /api/users - List all users (admin).
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    success(state.repo.list_users().await?)
}

/// GET /api/users/pending - Signups awaiting review (admin).
pub async fn list_pending_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    success(state.repo.list_users_by_status(AccountStatus::Pending).await?)
}

/// GET /api/users/{id} - Get a user (self or admin).
pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<User> {
    ensure_self_or_admin(&current, &id)?;

    match state.repo.get_user(&id).await? {
        Some(user) => success(user),
        None => Err(AppError::NotFound(format!("User {} not found", id))),
    }
}

/// PUT /api/users/{id} - Edit a user (admin).
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<User> {
    let user = state.repo.update_user(&id, &request).await?;
    tracing::info!(user = %user.username, grade = user.grade.as_str(), "User updated");
    success(user)
}

/// DELETE /api/users/{id} - Delete a user (admin).
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    if current.id == id {
        return Err(AppError::Conflict(
            "You cannot delete your own account".to_string(),
        ));
    }
    state.repo.delete_user(&id).await?;
    success(())
}

/// POST /api/users/{id}/approve - Activate a pending signup (admin).
pub async fn approve_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<User> {
    review_signup(state, &id, true).await
}

/// POST /api/users/{id}/reject - Decline a pending signup (admin).
pub async fn reject_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<User> {
    review_signup(state, &id, false).await
}

async fn review_signup(state: AppState, id: &str, approve: bool) -> ApiResult<User> {
    let user = state.repo.review_signup(id, approve).await?;
    tracing::info!(user = %user.username, approved = approve, "Signup reviewed");

    if let Err(e) = state.mailer.signup_reviewed(&user, approve).await {
        tracing::warn!("Failed to queue signup notification: {}", e);
    }
    success(user)
}

/// GET /api/users/{id}/cycles - Cycle history of a user (self or admin).
pub async fn list_user_cycles(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Vec<Cycle>> {
    ensure_self_or_admin(&current, &id)?;
    success(state.repo.list_cycles_for_user(&id).await?)
}

/// GET /api/leaderboard - Active users ranked by points.
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardQuery>,
) -> ApiResult<Vec<LeaderboardEntry>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    success(state.repo.leaderboard(limit).await?)
}
