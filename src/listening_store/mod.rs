mod models;
mod schema;
mod sqlite_listening_store;
mod table_view;

pub use models::*;
pub use schema::LISTENING_VERSIONED_SCHEMAS;
pub use sqlite_listening_store::SqliteListeningStore;
pub use table_view::{browsable_tables, BrowsableTable, TableRows};

use anyhow::Result;

pub trait ListeningStore: Send + Sync {
    fn get_listener(&self, listener_id: &str) -> Result<Option<Listener>>;
    fn get_track(&self, track_id: &str) -> Result<Option<Track>>;
    fn get_play(&self, play_id: i64) -> Result<Option<PlayEvent>>;

    /// Returns the ids from `track_ids` that have no stored track, in input order.
    fn missing_track_ids(&self, track_ids: &[String]) -> Result<Vec<String>>;

    /// Classifies the cycle's plays against stored ones and writes the
    /// listener, new tracks, new plays and the audit record, all in one
    /// transaction that holds the write lock from the first read.
    fn reconcile_and_commit(&self, write: &CycleWrite) -> Result<CycleCommit>;

    fn last_ingestion(&self) -> Result<Option<IngestionRecord>>;
    fn ingestion_history(&self, limit: usize) -> Result<Vec<IngestionRecord>>;

    /// Untagged plays newest first, skipping the first `offset`.
    fn untagged_plays_page(&self, limit: usize, offset: usize) -> Result<UntaggedPage>;
    /// Most recent plays that have not been tagged yet, newest first.
    fn list_untagged_plays(&self, limit: usize) -> Result<Vec<UntaggedPlay>> {
        Ok(self.untagged_plays_page(limit, 0)?.plays)
    }
    /// Stores both moods on a play. Returns false when the play does not exist.
    fn save_mood_tags(
        &self,
        play_id: i64,
        song_mood: MoodScore,
        listener_mood: MoodScore,
    ) -> Result<bool>;
    fn tagging_progress(&self) -> Result<TaggingProgress>;

    fn count_tracks(&self) -> Result<usize>;
    fn count_plays(&self) -> Result<usize>;

    fn table_names(&self) -> Vec<&'static str>;
    /// Reads up to `limit` rows of a table. Unknown names yield `None`.
    fn browse_table(&self, name: &str, limit: usize) -> Result<Option<TableRows>>;
}
