use super::model::SessionRecord;
use crate::model::{Category, Page, User};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Make sure a file-backed SQLite URL can be opened: create the parent
/// directory and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) if q.contains("mode=") => format!("sqlite://{}?{}", path, q),
        Some(q) => format!("sqlite://{}?{}&mode=rwc", path, q),
        None => format!("sqlite://{}?mode=rwc", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_category(pool: &Pool, name: &str, slug: &str) -> Result<Category> {
    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (name, slug) VALUES (?, ?) RETURNING id, name, slug, likes",
    )
    .bind(name)
    .bind(slug)
    .fetch_one(pool)
    .await?;
    Ok(category)
}

#[instrument(skip_all)]
pub async fn find_category_by_slug(pool: &Pool, slug: &str) -> Result<Option<Category>> {
    let category = sqlx::query_as::<_, Category>(
        "SELECT id, name, slug, likes FROM categories WHERE slug = ?",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(category)
}

/// Existing category whose name or slug collides with the given pair.
#[instrument(skip_all)]
pub async fn find_conflicting_category(
    pool: &Pool,
    name: &str,
    slug: &str,
) -> Result<Option<Category>> {
    let category = sqlx::query_as::<_, Category>(
        "SELECT id, name, slug, likes FROM categories WHERE name = ? OR slug = ? LIMIT 1",
    )
    .bind(name)
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(category)
}

#[instrument(skip_all)]
pub async fn top_categories(pool: &Pool, limit: i64) -> Result<Vec<Category>> {
    let rows = sqlx::query_as::<_, Category>(
        "SELECT id, name, slug, likes FROM categories ORDER BY likes DESC, id ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Atomically bump the like counter. Returns the new count, or `None` when
/// the category does not exist.
#[instrument(skip_all)]
pub async fn increment_category_likes(pool: &Pool, category_id: i64) -> Result<Option<i64>> {
    let likes = sqlx::query_scalar::<_, i64>(
        "UPDATE categories SET likes = likes + 1 WHERE id = ? RETURNING likes",
    )
    .bind(category_id)
    .fetch_optional(pool)
    .await?;
    Ok(likes)
}

#[instrument(skip_all)]
pub async fn insert_page(pool: &Pool, category_id: i64, title: &str, url: &str) -> Result<Page> {
    let page = sqlx::query_as::<_, Page>(
        "INSERT INTO pages (category_id, title, url, views) VALUES (?, ?, ?, 0) \
         RETURNING id, category_id, title, url, views",
    )
    .bind(category_id)
    .bind(title)
    .bind(url)
    .fetch_one(pool)
    .await?;
    Ok(page)
}

#[instrument(skip_all)]
pub async fn pages_for_category(pool: &Pool, category_id: i64) -> Result<Vec<Page>> {
    let rows = sqlx::query_as::<_, Page>(
        "SELECT id, category_id, title, url, views FROM pages WHERE category_id = ? ORDER BY id ASC",
    )
    .bind(category_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn top_pages(pool: &Pool, limit: i64) -> Result<Vec<Page>> {
    let rows = sqlx::query_as::<_, Page>(
        "SELECT id, category_id, title, url, views FROM pages ORDER BY views DESC, id ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn find_page(pool: &Pool, page_id: i64) -> Result<Option<Page>> {
    let page = sqlx::query_as::<_, Page>(
        "SELECT id, category_id, title, url, views FROM pages WHERE id = ?",
    )
    .bind(page_id)
    .fetch_optional(pool)
    .await?;
    Ok(page)
}

/// Single-statement `views = views + 1`; returns the page URL when the page exists.
#[instrument(skip_all)]
pub async fn increment_page_views(pool: &Pool, page_id: i64) -> Result<Option<String>> {
    let url = sqlx::query_scalar::<_, String>(
        "UPDATE pages SET views = views + 1 WHERE id = ? RETURNING url",
    )
    .bind(page_id)
    .fetch_optional(pool)
    .await?;
    Ok(url)
}

#[instrument(skip_all)]
pub async fn insert_user(
    pool: &Pool,
    username: &str,
    password_hash: &str,
    email: Option<&str>,
    website: Option<&str>,
    picture: Option<&str>,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, password_hash, email, website, picture) VALUES (?, ?, ?, ?, ?) \
         RETURNING id, username, password_hash, email, website, picture, is_active, created_at",
    )
    .bind(username)
    .bind(password_hash)
    .bind(email)
    .bind(website)
    .bind(picture)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

#[instrument(skip_all)]
pub async fn find_user_by_username(pool: &Pool, username: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, email, website, picture, is_active, created_at \
         FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

#[instrument(skip_all)]
pub async fn find_user(pool: &Pool, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, email, website, picture, is_active, created_at \
         FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

#[instrument(skip_all)]
pub async fn set_user_active(pool: &Pool, user_id: i64, active: bool) -> Result<()> {
    sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
        .bind(active)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_session(pool: &Pool, session_key: &str) -> Result<Option<HashMap<String, String>>> {
    let record = sqlx::query_as::<_, SessionRecord>(
        "SELECT session_key, data, updated_at FROM sessions WHERE session_key = ?",
    )
    .bind(session_key)
    .fetch_optional(pool)
    .await?;
    let Some(record) = record else {
        return Ok(None);
    };
    let data: HashMap<String, String> = serde_json::from_str(&record.data)
        .with_context(|| format!("corrupt session data for {}", record.session_key))?;
    Ok(Some(data))
}

#[instrument(skip_all)]
pub async fn save_session(
    pool: &Pool,
    session_key: &str,
    data: &HashMap<String, String>,
) -> Result<()> {
    let encoded = serde_json::to_string(data)?;
    sqlx::query(
        "INSERT INTO sessions (session_key, data, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(session_key) DO UPDATE SET data = excluded.data, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(session_key)
    .bind(encoded)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_session(pool: &Pool, session_key: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE session_key = ?")
        .bind(session_key)
        .execute(pool)
        .await?;
    Ok(())
}

/// True when `err` wraps a SQLite unique-constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}
