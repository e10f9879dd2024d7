//! News endpoints.

use axum::extract::{Path, State};

use super::{success, ApiResult, Json};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::models::{CreateNewsRequest, News, UpdateNewsRequest};
use crate::AppState;

/// GET /api/news - All posts, newest first.
pub async fn list_news(State(state): State<AppState>) -> ApiResult<Vec<News>> {
    success(state.repo.list_news().await?)
}

/// GET /api/news/{id} - A single post.
pub async fn get_news(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<News> {
    match state.repo.get_news(&id).await? {
        Some(news) => success(news),
        None => Err(AppError::NotFound(format!("News {} not found", id))),
    }
}

/// POST /api/news - Publish a post (admin).
pub async fn create_news(
    State(state): State<AppState>,
    CurrentUser(author): CurrentUser,
    Json(request): Json<CreateNewsRequest>,
) -> ApiResult<News> {
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    success(state.repo.create_news(&author.id, &request).await?)
}

/// PUT /api/news/{id} - Edit a post (admin).
pub async fn update_news(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateNewsRequest>,
) -> ApiResult<News> {
    success(state.repo.update_news(&id, &request).await?)
}

/// DELETE /api/news/{id} - Remove a post (admin).
pub async fn delete_news(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repo.delete_news(&id).await?;
    success(())
}
