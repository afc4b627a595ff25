//! Core data models for the object gateway.
//!
//! Catalog rows map to SQLite tables via `sqlx::FromRow`; the multipart
//! session types are plain values that callers hold between requests.

pub mod bucket;
pub mod multipart;
pub mod object;
