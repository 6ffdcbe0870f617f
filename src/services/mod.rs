//! Core logic: the upload history store and the policies built on top of it.

pub mod dedup_coordinator;
pub mod hashing;
pub mod legacy_import;
pub mod revalidation;
pub mod upload_cache;
