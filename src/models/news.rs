//! News post model.

use serde::{Deserialize, Serialize};

/// An announcement shown on the portal home page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct News {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for publishing news.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNewsRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Request body for editing news.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateNewsRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}
