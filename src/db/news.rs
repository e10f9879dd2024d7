//! News operations.

use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{new_id, now, Repository};
use crate::errors::AppError;
use crate::models::{CreateNewsRequest, News, UpdateNewsRequest};

impl Repository {
    /// List news, newest first.
    pub async fn list_news(&self) -> Result<Vec<News>, AppError> {
        let rows = sqlx::query(
            "SELECT id, title, body, author_id, created_at, updated_at FROM news ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(news_from_row).collect())
    }

    /// Get a news post by ID.
    pub async fn get_news(&self, id: &str) -> Result<Option<News>, AppError> {
        let row = sqlx::query(
            "SELECT id, title, body, author_id, created_at, updated_at FROM news WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(news_from_row))
    }

    /// Publish a news post.
    pub async fn create_news(
        &self,
        author_id: &str,
        request: &CreateNewsRequest,
    ) -> Result<News, AppError> {
        let now = now();
        let news = News {
            id: new_id(),
            title: request.title.trim().to_string(),
            body: request.body.clone(),
            author_id: author_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO news (id, title, body, author_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&news.id)
        .bind(&news.title)
        .bind(&news.body)
        .bind(&news.author_id)
        .bind(&news.created_at)
        .bind(&news.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(news)
    }

    /// Edit a news post.
    pub async fn update_news(&self, id: &str, request: &UpdateNewsRequest) -> Result<News, AppError> {
        let existing = self
            .get_news(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("News {} not found", id)))?;

        let now = now();
        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.title)
            .to_string();
        if title.is_empty() {
            return Err(AppError::Validation("Title cannot be empty".to_string()));
        }
        let body = request.body.clone().unwrap_or(existing.body.clone());

        sqlx::query("UPDATE news SET title = ?, body = ?, updated_at = ? WHERE id = ?")
            .bind(&title)
            .bind(&body)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(News {
            title,
            body,
            updated_at: now,
            ..existing
        })
    }

    /// Delete a news post.
    pub async fn delete_news(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM news WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("News {} not found", id)));
        }

        Ok(())
    }
}

fn news_from_row(row: &SqliteRow) -> News {
    News {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        author_id: row.get("author_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
