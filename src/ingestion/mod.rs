//! Incremental ingestion of the listener's play history.
//!
//! Each cycle:
//! 1. Makes sure the access credential is fresh
//! 2. Fetches the most recent plays (at most 50)
//! 3. Looks up audio features for tracks the store has not seen yet
//! 4. In one transaction, skips plays already stored, keyed by
//!    (track, played_at), and writes tracks, plays and the ingestion record

mod engine;

pub use crate::listening_store::PlayDisposition;
pub use engine::{CycleReport, IngestionEngine};
