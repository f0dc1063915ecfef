//! Server-side sessions keyed by an opaque `sessionid` cookie.
//!
//! A [`Session`] is loaded at the start of a request, handed explicitly to
//! whatever needs it, and written back with [`save`] when modified.

use std::collections::HashMap;

use anyhow::Result;
use axum::http::{header, HeaderMap, HeaderValue};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::{self, Pool};

pub const COOKIE_NAME: &str = "sessionid";
pub const AUTH_USER_KEY: &str = "_auth_user_id";

#[derive(Debug, Clone, Default)]
pub struct Session {
    key: Option<String>,
    data: HashMap<String, String>,
    modified: bool,
}

impl Session {
    /// Empty session without a key; a key is assigned on first save.
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(key: String, data: HashMap<String, String>) -> Self {
        Self {
            key: Some(key),
            data,
            modified: false,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.data.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.data.insert(name.to_string(), value.into());
        self.modified = true;
    }

    pub fn user_id(&self) -> Option<i64> {
        self.get(AUTH_USER_KEY).and_then(|v| v.parse().ok())
    }

    /// Keep the values but issue a new key on the next save.
    pub fn cycle_key(&mut self) {
        self.key = None;
        self.modified = true;
    }

    /// Drop all values and rotate the key so the old cookie is useless.
    pub fn flush(&mut self) {
        self.data.clear();
        self.key = None;
        self.modified = true;
    }
}

/// Extract the session key from a `Cookie` header, if any.
pub fn session_key_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load the session named by the request cookie. Unknown keys yield a fresh
/// session rather than an error.
#[instrument(skip_all)]
pub async fn load(pool: &Pool, headers: &HeaderMap) -> Result<Session> {
    let Some(key) = session_key_from_headers(headers) else {
        return Ok(Session::new());
    };
    match db::load_session(pool, &key).await? {
        Some(data) => Ok(Session::existing(key, data)),
        None => {
            debug!("unknown session key; starting a new session");
            Ok(Session::new())
        }
    }
}

/// Persist a modified session. Returns a `Set-Cookie` value when the client
/// needs to learn a new key.
#[instrument(skip_all)]
pub async fn save(pool: &Pool, session: &mut Session) -> Result<Option<HeaderValue>> {
    if !session.modified {
        return Ok(None);
    }
    let (key, is_new) = match session.key.clone() {
        Some(key) => (key, false),
        None => (Uuid::new_v4().to_string(), true),
    };
    db::save_session(pool, &key, &session.data).await?;
    session.key = Some(key.clone());
    session.modified = false;

    if is_new {
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", COOKIE_NAME, key);
        Ok(Some(HeaderValue::from_str(&cookie)?))
    } else {
        Ok(None)
    }
}

/// Remove a session from storage entirely (logout).
#[instrument(skip_all)]
pub async fn destroy(pool: &Pool, session: &mut Session) -> Result<()> {
    if let Some(key) = session.key() {
        db::delete_session(pool, key).await?;
    }
    session.flush();
    Ok(())
}
