//! Data models for the upload cache.
//!
//! Rows are read from SQLite through private `*Row` types and converted into
//! the public models, which serialize as JSON via `serde`.

pub mod stats;
pub mod upload;
