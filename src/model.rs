use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub likes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Page {
    pub id: i64,
    pub category_id: i64,
    pub title: String,
    pub url: String,
    pub views: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: Option<String>,
    pub website: Option<String>,
    /// Link to a profile image; uploads are not stored locally.
    pub picture: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

/// A single listing returned by the search provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub summary: String,
}
