//! Database repository for CRUD operations.
//!
//! Uses prepared statements and transactions for data integrity. Operations
//! are split by entity across the sibling modules; this file holds the
//! shared handle and row helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Check the database answers.
    pub async fn ping(&self) -> Result<(), crate::errors::AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Canonical stored form of a timestamp.
///
/// Every timestamp column uses this fixed-width UTC format so that range
/// queries can compare the text directly.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(super) fn now() -> String {
    timestamp(Utc::now())
}

pub(super) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(super) fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

pub(super) fn to_json_array(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}
