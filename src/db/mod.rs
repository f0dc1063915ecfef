//! Database module: row models and SQL repositories.
//!
//! - `model`: row shapes that are not domain entities (sessions).
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `rango::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::SessionRecord;
