//! HTTP surface. Every handler loads the caller's session explicitly, does its
//! work through the service modules, and writes the session back if it changed.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};

use crate::auth::{self, LoginForm, RegisterForm};
use crate::content::{self, CategoryForm, PageForm};
use crate::db::Pool;
use crate::error::AppError;
use crate::model::{Category, Page, SearchResult, User};
use crate::search::{self, SearchService};
use crate::session::{self, COOKIE_NAME};
use crate::visits;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub search: Arc<dyn SearchService>,
    pub site_name: Arc<str>,
}

impl AppState {
    pub fn new(pool: Pool, search: Arc<dyn SearchService>, site_name: &str) -> Self {
        Self {
            pool,
            search,
            site_name: Arc::from(site_name),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/about", get(about))
        .route("/category/{slug}", get(show_category))
        .route("/category/{slug}/add_page", post(add_page))
        .route("/add_category", post(add_category))
        .route("/like_category", post(like_category))
        .route("/goto", get(track_url))
        .route("/search", get(search_form).post(run_search))
        .route("/register", post(register))
        .route("/login", post(user_login))
        .route("/logout", get(user_logout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn with_cookie(cookie: Option<HeaderValue>, body: impl IntoResponse) -> Response {
    let mut res = body.into_response();
    if let Some(cookie) = cookie {
        res.headers_mut().append(header::SET_COOKIE, cookie);
    }
    res
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexContext {
    pub categories: Vec<Category>,
    pub pages: Vec<Page>,
    pub visits: u32,
}

#[instrument(skip_all)]
async fn index(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let mut session = session::load(&state.pool, &headers).await?;
    let categories = content::list_top_categories(&state.pool).await?;
    let pages = content::list_top_pages(&state.pool).await?;
    let visit = visits::track_visit(&mut session);
    let cookie = session::save(&state.pool, &mut session).await?;
    Ok(with_cookie(
        cookie,
        Json(IndexContext {
            categories,
            pages,
            visits: visit.visits,
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AboutContext {
    pub name: String,
    pub visits: u32,
}

#[instrument(skip_all)]
async fn about(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let mut session = session::load(&state.pool, &headers).await?;
    let visit = visits::track_visit(&mut session);
    let cookie = session::save(&state.pool, &mut session).await?;
    Ok(with_cookie(
        cookie,
        Json(AboutContext {
            name: state.site_name.to_string(),
            visits: visit.visits,
        }),
    ))
}

#[instrument(skip_all, fields(slug = %slug))]
async fn show_category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let ctx = content::show_category(&state.pool, &slug).await?;
    Ok(Json(ctx).into_response())
}

#[instrument(skip_all)]
async fn add_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<CategoryForm>,
) -> Result<Response, AppError> {
    let session = session::load(&state.pool, &headers).await?;
    auth::require_user(&state.pool, &session).await?;
    let category = content::create_category(&state.pool, &form).await?;
    Ok((StatusCode::CREATED, Json(category)).into_response())
}

#[instrument(skip_all, fields(slug = %slug))]
async fn add_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Form(form): Form<PageForm>,
) -> Result<Response, AppError> {
    let session = session::load(&state.pool, &headers).await?;
    auth::require_user(&state.pool, &session).await?;
    let page = content::create_page(&state.pool, &slug, &form).await?;
    Ok((StatusCode::CREATED, Json(page)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LikeForm {
    pub category_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LikeResponse {
    pub likes: i64,
}

#[instrument(skip_all)]
async fn like_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LikeForm>,
) -> Result<Response, AppError> {
    let session = session::load(&state.pool, &headers).await?;
    auth::require_user(&state.pool, &session).await?;
    let likes = content::like_category(&state.pool, form.category_id).await?;
    Ok(Json(LikeResponse { likes }).into_response())
}

#[derive(Debug, Deserialize)]
pub struct GotoParams {
    pub page_id: Option<String>,
}

/// Count the click and redirect to the page; junk ids go to the index.
#[instrument(skip_all)]
async fn track_url(
    State(state): State<AppState>,
    Query(params): Query<GotoParams>,
) -> Result<Response, AppError> {
    let page_id = params
        .page_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok());
    let target = content::record_page_view(&state.pool, page_id).await?;
    let location = HeaderValue::from_str(&target).unwrap_or_else(|_| {
        warn!(target = %target.escape_debug(), "stored page URL is not a valid Location");
        HeaderValue::from_static(content::FALLBACK_LOCATION)
    });
    Ok((StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SearchForm {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchContext {
    pub query: Option<String>,
    pub result_list: Vec<SearchResult>,
}

async fn search_form() -> Json<SearchContext> {
    Json(SearchContext {
        query: None,
        result_list: Vec::new(),
    })
}

#[instrument(skip_all)]
async fn run_search(
    State(state): State<AppState>,
    Form(form): Form<SearchForm>,
) -> Result<Json<SearchContext>, AppError> {
    let result_list = search::run_query(state.search.as_ref(), &form.query).await?;
    Ok(Json(SearchContext {
        query: Some(form.query),
        result_list,
    }))
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub registered: bool,
    pub user: User,
}

#[instrument(skip_all)]
async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    let user = auth::register(&state.pool, &form).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            registered: true,
            user,
        }),
    )
        .into_response())
}

#[instrument(skip_all)]
async fn user_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let mut session = session::load(&state.pool, &headers).await?;
    auth::login(&state.pool, &mut session, &form).await?;
    let cookie = session::save(&state.pool, &mut session).await?;
    Ok(with_cookie(cookie, Redirect::to("/")))
}

#[instrument(skip_all)]
async fn user_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut session = session::load(&state.pool, &headers).await?;
    auth::require_user(&state.pool, &session).await?;
    auth::logout(&state.pool, &mut session).await?;
    let expired = HeaderValue::from_str(&format!("{}=; Path=/; Max-Age=0", COOKIE_NAME))
        .map_err(anyhow::Error::from)?;
    Ok(with_cookie(Some(expired), Redirect::to("/")))
}
