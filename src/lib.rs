//! Moodsync Server Library
//!
//! Listening-history ingestion for mood tagging: credential lifecycle,
//! platform client, ingestion engine, SQLite persistence and the HTTP layer.

pub mod config;
pub mod credentials;
pub mod error;
pub mod ingestion;
pub mod listening_store;
pub mod platform;
pub mod server;
pub mod service;
pub mod sqlite_persistence;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types for convenience
pub use error::{AuthError, SyncError, TaggingError};
pub use ingestion::{CycleReport, IngestionEngine};
pub use server::{run_server, RequestsLoggingLevel};
pub use service::HistoryService;
