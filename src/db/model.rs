//! Row models used by repositories that have no counterpart in `crate::model`.

use chrono::NaiveDateTime;
use sqlx::FromRow;

/// Raw session row; `data` is a JSON object of string values.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub session_key: String,
    pub data: String,
    pub updated_at: NaiveDateTime,
}
