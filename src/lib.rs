//! Asset Store
//!
//! Chunked binary asset storage with streamed upload and download.
//!
//! # Modules
//!
//! - `store`: chunk persistence (SQLite, S3, in-memory)
//! - `assets`: upload/download pipelines and the HTTP-facing service
//! - `routes`: axum router
//! - `storage`: S3 client wrapper used by the S3 backend

pub mod assets;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod store;
