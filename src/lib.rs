pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod model;
pub mod routes;
pub mod search;
pub mod session;
pub mod visits;
