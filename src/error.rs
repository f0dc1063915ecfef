use std::collections::BTreeMap;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::search::CredentialError;

/// Field name -> human readable messages, like a rejected form.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut out = FieldErrors::default();
        for (field, errs) in errors.field_errors() {
            for err in errs {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                out.add(&field, message);
            }
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("search unavailable")]
    SearchUnavailable(#[from] CredentialError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(FieldErrors),

    #[error("login required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("Invalid login details supplied.")]
    InvalidLogin,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::SearchUnavailable(err) => {
                error!(error = %err, "search credentials missing");
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized | AppError::InvalidLogin => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Internal(err) => {
                error!(error = ?err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match &self {
            AppError::Validation(fields) => json!({ "error": "invalid input", "fields": fields }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_errors_display_is_stable() {
        let mut errors = FieldErrors::single("url", "Enter a valid URL.");
        errors.add("title", "This field is required.");
        errors.add("url", "Too long.");
        assert_eq!(
            errors.to_string(),
            "title: This field is required.; url: Enter a valid URL., Too long."
        );
        assert!(errors.contains("url"));
    }

    #[test]
    fn status_codes() {
        assert_eq!(AppError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Validation(FieldErrors::single("name", "x")).into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::NotFound("page".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        let missing = CredentialError::Empty("bing.key".into());
        assert_eq!(
            AppError::from(missing).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
