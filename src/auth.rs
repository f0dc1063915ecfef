//! Accounts: registration, password login and logout.
//!
//! The logged-in user id lives in the session under
//! [`crate::session::AUTH_USER_KEY`].

use anyhow::Result;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::{self, Pool};
use crate::error::{AppError, FieldErrors};
use crate::model::User;
use crate::session::{self, Session, AUTH_USER_KEY};

static USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9@.+_-]+$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid input: {0}")]
    Validation(FieldErrors),
    #[error("Invalid login details supplied.")]
    InvalidLogin,
    #[error("Your Rango account is disabled.")]
    Disabled,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(fields) => AppError::Validation(fields),
            AuthError::InvalidLogin => AppError::InvalidLogin,
            AuthError::Disabled => AppError::Forbidden(AuthError::Disabled.to_string()),
            AuthError::Storage(err) => AppError::Internal(err),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterForm {
    #[validate(length(min = 1, max = 150, message = "Required. 150 characters or fewer."))]
    pub username: String,
    #[validate(length(min = 8, message = "This password is too short. It must contain at least 8 characters."))]
    pub password: String,
    #[serde(default)]
    #[validate(email(message = "Enter a valid email address."))]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(url(message = "Enter a valid URL."))]
    pub website: Option<String>,
    #[serde(default)]
    #[validate(url(message = "Enter a valid URL."))]
    pub picture: Option<String>,
}

impl RegisterForm {
    fn cleaned(&self) -> Self {
        let optional = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            username: self.username.trim().to_string(),
            password: self.password.clone(),
            email: optional(&self.email),
            website: optional(&self.website),
            picture: optional(&self.picture),
        }
    }

    fn check(&self) -> Result<(), FieldErrors> {
        let mut errors = match self.validate() {
            Ok(()) => FieldErrors::default(),
            Err(e) => e.into(),
        };
        if !self.username.is_empty() && !USERNAME.is_match(&self.username) {
            errors.add(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())?;
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            warn!(error = %err, "unreadable password hash");
            false
        }
    }
}

#[instrument(skip_all)]
pub async fn register(pool: &Pool, form: &RegisterForm) -> Result<User, AuthError> {
    let form = form.cleaned();
    form.check().map_err(AuthError::Validation)?;

    if db::find_user_by_username(pool, &form.username).await?.is_some() {
        return Err(duplicate_username());
    }

    let hash = hash_password(&form.password)?;
    let user = match db::insert_user(
        pool,
        &form.username,
        &hash,
        form.email.as_deref(),
        form.website.as_deref(),
        form.picture.as_deref(),
    )
    .await
    {
        Ok(user) => user,
        Err(err) if db::is_unique_violation(&err) => return Err(duplicate_username()),
        Err(err) => return Err(err.into()),
    };
    info!(user_id = user.id, "user registered");
    Ok(user)
}

fn duplicate_username() -> AuthError {
    AuthError::Validation(FieldErrors::single(
        "username",
        "A user with that username already exists.",
    ))
}

/// The user matching the credentials, active or not.
#[instrument(skip_all)]
pub async fn authenticate(pool: &Pool, username: &str, password: &str) -> Result<Option<User>> {
    let Some(user) = db::find_user_by_username(pool, username.trim()).await? else {
        return Ok(None);
    };
    if verify_password(password, &user.password_hash) {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Authenticate and attach the user to the session under a fresh key.
#[instrument(skip_all)]
pub async fn login(pool: &Pool, session: &mut Session, form: &LoginForm) -> Result<User, AuthError> {
    let Some(user) = authenticate(pool, &form.username, &form.password).await? else {
        warn!(username = %form.username.trim(), "invalid login details");
        return Err(AuthError::InvalidLogin);
    };
    if !user.is_active {
        return Err(AuthError::Disabled);
    }

    if let Some(old_key) = session.key().map(str::to_string) {
        db::delete_session(pool, &old_key).await?;
    }
    session.cycle_key();
    session.insert(AUTH_USER_KEY, user.id.to_string());
    info!(user_id = user.id, "user logged in");
    Ok(user)
}

#[instrument(skip_all)]
pub async fn logout(pool: &Pool, session: &mut Session) -> Result<()> {
    if let Some(user_id) = session.user_id() {
        info!(user_id, "user logged out");
    }
    session::destroy(pool, session).await
}

/// The active user attached to the session, if any.
#[instrument(skip_all)]
pub async fn current_user(pool: &Pool, session: &Session) -> Result<Option<User>> {
    let Some(user_id) = session.user_id() else {
        return Ok(None);
    };
    Ok(db::find_user(pool, user_id)
        .await?
        .filter(|u| u.is_active))
}

/// Like [`current_user`] but fails with `Unauthorized` when nobody is logged in.
pub async fn require_user(pool: &Pool, session: &Session) -> Result<User, AppError> {
    current_user(pool, session)
        .await?
        .ok_or(AppError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn form(username: &str, password: &str) -> RegisterForm {
        RegisterForm {
            username: username.into(),
            password: password.into(),
            email: Some(String::new()),
            website: None,
            picture: None,
        }
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "plaintext"));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let pool = setup_pool().await;
        match register(&pool, &form("bad name", "short")).await {
            Err(AuthError::Validation(fields)) => {
                assert!(fields.contains("username"));
                assert!(fields.contains("password"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let mut f = form("leo", "long enough");
        f.email = Some("not-an-email".into());
        assert!(matches!(register(&pool, &f).await, Err(AuthError::Validation(_))));

        let mut f = form("leo", "long enough");
        f.picture = Some("not a link".into());
        match register(&pool, &f).await {
            Err(AuthError::Validation(fields)) => assert!(fields.contains("picture")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn register_then_login_and_logout() {
        let pool = setup_pool().await;
        let user = register(&pool, &form("leo", "long enough")).await.unwrap();
        assert!(user.is_active);
        assert!(user.email.is_none());
        assert!(user.picture.is_none());
        assert!(matches!(
            register(&pool, &form("leo", "another password")).await,
            Err(AuthError::Validation(_))
        ));

        let mut session = Session::new();
        let bad = LoginForm { username: "leo".into(), password: "nope".into() };
        assert!(matches!(
            login(&pool, &mut session, &bad).await,
            Err(AuthError::InvalidLogin)
        ));

        let good = LoginForm { username: "leo".into(), password: "long enough".into() };
        login(&pool, &mut session, &good).await.unwrap();
        assert_eq!(session.user_id(), Some(user.id));
        assert_eq!(current_user(&pool, &session).await.unwrap().unwrap().username, "leo");

        logout(&pool, &mut session).await.unwrap();
        assert!(current_user(&pool, &session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_keeps_optional_profile_links() {
        let pool = setup_pool().await;
        let mut f = form("ada", "long enough");
        f.website = Some(" https://ada.dev ".into());
        f.picture = Some("https://ada.dev/me.png".into());
        let user = register(&pool, &f).await.unwrap();
        assert_eq!(user.website.as_deref(), Some("https://ada.dev"));
        assert_eq!(user.picture.as_deref(), Some("https://ada.dev/me.png"));

        let stored = db::find_user(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(stored.picture.as_deref(), Some("https://ada.dev/me.png"));
    }

    #[tokio::test]
    async fn disabled_accounts_cannot_log_in() {
        let pool = setup_pool().await;
        let user = register(&pool, &form("sleepy", "long enough")).await.unwrap();
        db::set_user_active(&pool, user.id, false).await.unwrap();

        let mut session = Session::new();
        let creds = LoginForm { username: "sleepy".into(), password: "long enough".into() };
        assert!(matches!(
            login(&pool, &mut session, &creds).await,
            Err(AuthError::Disabled)
        ));
        assert!(session.user_id().is_none());
    }
}
