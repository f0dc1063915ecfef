//! Category and page browsing plus validated creation.
//!
//! Counters (page views, category likes) are bumped with a single SQL
//! statement so concurrent traversals never lose an update.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use unicode_normalization::UnicodeNormalization;
use validator::Validate;

use crate::db::{self, Pool};
use crate::error::{AppError, FieldErrors};
use crate::model::{Category, Page};

pub const TOP_LIMIT: i64 = 5;
pub const FALLBACK_LOCATION: &str = "/";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("invalid input: {0}")]
    Validation(FieldErrors),
    #[error("category {0} not found")]
    CategoryNotFound(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<ContentError> for AppError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::Validation(fields) => AppError::Validation(fields),
            ContentError::CategoryNotFound(slug) => AppError::NotFound(format!("category {}", slug)),
            ContentError::NotFound(what) => AppError::NotFound(what.to_string()),
            ContentError::Storage(err) => AppError::Internal(err),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CategoryForm {
    #[validate(length(min = 1, max = 128, message = "Please enter a category name of at most 128 characters."))]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PageForm {
    #[validate(length(min = 1, max = 128, message = "Please enter a title of at most 128 characters."))]
    pub title: String,
    #[validate(
        length(min = 1, max = 200, message = "Please enter a URL of at most 200 characters."),
        url(message = "Enter a valid URL.")
    )]
    pub url: String,
}

impl CategoryForm {
    fn cleaned(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
        }
    }
}

impl PageForm {
    /// Trim fields and default a scheme-less URL to `http://`.
    fn cleaned(&self) -> Self {
        let url = self.url.trim();
        let url = if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("http://{}", url)
        };
        Self {
            title: self.title.trim().to_string(),
            url,
        }
    }
}

/// Canonical form of a page URL: ASCII only, percent-encoded, safe to send
/// back as a `Location` header. Embedded whitespace or control characters are
/// refused instead of being silently dropped by the parser.
pub fn normalize_page_url(raw: &str) -> Result<String, FieldErrors> {
    let invalid = || FieldErrors::single("url", "Enter a valid URL.");
    if raw.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(invalid());
    }
    let url = Url::parse(raw).map_err(|_| invalid())?;
    let normalized = String::from(url);
    if normalized.len() > 200 {
        return Err(FieldErrors::single(
            "url",
            "Please enter a URL of at most 200 characters.",
        ));
    }
    Ok(normalized)
}

/// Data behind the category page. Both fields are `None` for an unknown slug.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CategoryContext {
    pub category: Option<Category>,
    pub pages: Option<Vec<Page>>,
}

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").expect("valid regex"));

/// URL-safe identifier for a name: accents folded to their base letter, other
/// non-ASCII dropped, lowercase, words joined by `-`.
pub fn slugify(name: &str) -> String {
    let ascii: String = name.nfkd().filter(char::is_ascii).collect();
    let lowered = ascii.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    let joined = SEPARATORS.replace_all(&stripped, "-");
    joined.trim_matches(|c| c == '-' || c == '_').to_string()
}

#[instrument(skip_all)]
pub async fn list_top_categories(pool: &Pool) -> Result<Vec<Category>, ContentError> {
    Ok(db::top_categories(pool, TOP_LIMIT).await?)
}

#[instrument(skip_all)]
pub async fn list_top_pages(pool: &Pool) -> Result<Vec<Page>, ContentError> {
    Ok(db::top_pages(pool, TOP_LIMIT).await?)
}

#[instrument(skip_all, fields(slug = %slug))]
pub async fn get_category(pool: &Pool, slug: &str) -> Result<Option<Category>, ContentError> {
    Ok(db::find_category_by_slug(pool, slug).await?)
}

#[instrument(skip_all)]
pub async fn list_pages_for_category(
    pool: &Pool,
    category: &Category,
) -> Result<Vec<Page>, ContentError> {
    Ok(db::pages_for_category(pool, category.id).await?)
}

#[instrument(skip_all, fields(slug = %slug))]
pub async fn show_category(pool: &Pool, slug: &str) -> Result<CategoryContext, ContentError> {
    match get_category(pool, slug).await? {
        Some(category) => {
            let pages = list_pages_for_category(pool, &category).await?;
            Ok(CategoryContext {
                category: Some(category),
                pages: Some(pages),
            })
        }
        None => Ok(CategoryContext {
            category: None,
            pages: None,
        }),
    }
}

/// Count a traversal of `page_id` and return where to send the visitor.
/// A missing or unknown id sends them to [`FALLBACK_LOCATION`].
#[instrument(skip_all, fields(page_id = ?page_id))]
pub async fn record_page_view(pool: &Pool, page_id: Option<i64>) -> Result<String, ContentError> {
    let Some(page_id) = page_id else {
        return Ok(FALLBACK_LOCATION.to_string());
    };
    match db::increment_page_views(pool, page_id).await? {
        Some(url) => Ok(url),
        None => {
            warn!(page_id, "view recorded for unknown page");
            Ok(FALLBACK_LOCATION.to_string())
        }
    }
}

#[instrument(skip_all)]
pub async fn create_category(pool: &Pool, form: &CategoryForm) -> Result<Category, ContentError> {
    let form = form.cleaned();
    form.validate()
        .map_err(|e| ContentError::Validation(e.into()))?;

    let slug = slugify(&form.name);
    if slug.is_empty() {
        return Err(ContentError::Validation(FieldErrors::single(
            "name",
            "Category name must contain letters or digits.",
        )));
    }

    if db::find_conflicting_category(pool, &form.name, &slug)
        .await?
        .is_some()
    {
        return Err(duplicate_category());
    }

    match db::insert_category(pool, &form.name, &slug).await {
        Ok(category) => {
            info!(id = category.id, slug = %category.slug, "category created");
            Ok(category)
        }
        Err(err) if db::is_unique_violation(&err) => Err(duplicate_category()),
        Err(err) => Err(err.into()),
    }
}

fn duplicate_category() -> ContentError {
    ContentError::Validation(FieldErrors::single(
        "name",
        "Category with this name already exists.",
    ))
}

#[instrument(skip_all, fields(category_slug = %category_slug))]
pub async fn create_page(
    pool: &Pool,
    category_slug: &str,
    form: &PageForm,
) -> Result<Page, ContentError> {
    let form = form.cleaned();
    form.validate()
        .map_err(|e| ContentError::Validation(e.into()))?;
    let url = normalize_page_url(&form.url).map_err(ContentError::Validation)?;

    let category = get_category(pool, category_slug)
        .await?
        .ok_or_else(|| ContentError::CategoryNotFound(category_slug.to_string()))?;

    let page = db::insert_page(pool, category.id, &form.title, &url).await?;
    info!(id = page.id, category = %category.slug, "page created");
    Ok(page)
}

#[instrument(skip_all, fields(category_id = category_id))]
pub async fn like_category(pool: &Pool, category_id: i64) -> Result<i64, ContentError> {
    db::increment_category_likes(pool, category_id)
        .await?
        .ok_or(ContentError::NotFound("category"))
}
