use super::models::{
    canonical_timestamp, parse_timestamp, AudioFeatures, CycleCommit, CycleWrite, IngestionRecord,
    Listener, MoodScore, PlayDisposition, PlayEvent, PlayKey, TaggingProgress, Track, UntaggedPage,
    UntaggedPlay,
};
use super::schema::LISTENING_VERSIONED_SCHEMAS;
use super::table_view::{browsable_tables, BrowsableTable, TableRows};
use super::ListeningStore;
use crate::sqlite_persistence::prepare_database;
use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Subset of `keys` already present in `plays`.
fn known_play_keys_in(conn: &Connection, keys: &[PlayKey]) -> Result<HashSet<PlayKey>> {
    let mut stmt = conn.prepare_cached(
        "SELECT EXISTS(SELECT 1 FROM plays WHERE track_id = ?1 AND played_at = ?2)",
    )?;
    let mut known = HashSet::new();
    for key in keys {
        let exists: bool = stmt.query_row(params![key.track_id, key.played_at], |row| row.get(0))?;
        if exists {
            known.insert(key.clone());
        }
    }
    Ok(known)
}

/// Distinct ids from `track_ids` with no stored track, in input order.
fn missing_track_ids_in(conn: &Connection, track_ids: &[String]) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT EXISTS(SELECT 1 FROM tracks WHERE track_id = ?1)")?;
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for track_id in track_ids {
        if !seen.insert(track_id.as_str()) {
            continue;
        }
        let exists: bool = stmt.query_row(params![track_id], |row| row.get(0))?;
        if !exists {
            missing.push(track_id.clone());
        }
    }
    Ok(missing)
}

pub struct SqliteListeningStore {
    conn: Arc<Mutex<Connection>>,
    tables: Vec<Box<dyn BrowsableTable>>,
}

impl SqliteListeningStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open listening database")?;
        prepare_database(&mut conn, is_new_db, LISTENING_VERSIONED_SCHEMAS, "listening")?;
        info!("Listening database ready at {:?}", path);

        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        prepare_database(&mut conn, true, LISTENING_VERSIONED_SCHEMAS, "listening")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            tables: browsable_tables(),
        }
    }

    fn conversion_failure(
        row: &rusqlite::Row,
        column: &str,
        sql_type: rusqlite::types::Type,
        err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> rusqlite::Error {
        let index = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(index, sql_type, err.into())
    }

    fn read_timestamp(row: &rusqlite::Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
        let text: String = row.get(column)?;
        parse_timestamp(&text)
            .map_err(|e| Self::conversion_failure(row, column, rusqlite::types::Type::Text, e))
    }

    fn read_optional_timestamp(
        row: &rusqlite::Row,
        column: &str,
    ) -> rusqlite::Result<Option<DateTime<Utc>>> {
        let text: Option<String> = row.get(column)?;
        text.map(|s| {
            parse_timestamp(&s)
                .map_err(|e| Self::conversion_failure(row, column, rusqlite::types::Type::Text, e))
        })
        .transpose()
    }

    fn read_mood(row: &rusqlite::Row, column: &str) -> rusqlite::Result<Option<MoodScore>> {
        let value: Option<i64> = row.get(column)?;
        value
            .map(|v| {
                MoodScore::try_from(v).map_err(|e| {
                    Self::conversion_failure(row, column, rusqlite::types::Type::Integer, e)
                })
            })
            .transpose()
    }

    fn row_to_listener(row: &rusqlite::Row) -> rusqlite::Result<Listener> {
        Ok(Listener {
            id: row.get("listener_id")?,
            display_name: row.get("display_name")?,
            email: row.get("email")?,
            first_seen_at: Self::read_timestamp(row, "first_seen_at")?,
        })
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<Track> {
        let energy: Option<f64> = row.get("energy")?;
        let danceability: Option<f64> = row.get("danceability")?;
        let valence: Option<f64> = row.get("valence")?;
        let tempo: Option<f64> = row.get("tempo")?;
        let features = match (energy, danceability, valence, tempo) {
            (Some(energy), Some(danceability), Some(valence), Some(tempo)) => Some(AudioFeatures {
                energy,
                danceability,
                valence,
                tempo,
            }),
            _ => None,
        };

        Ok(Track {
            id: row.get("track_id")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            duration_ms: row.get("duration_ms")?,
            popularity: row.get("popularity")?,
            genre: row.get("genre")?,
            features,
            mood: row.get("mood")?,
            first_seen_at: Self::read_timestamp(row, "first_seen_at")?,
            listener_id: row.get("listener_id")?,
        })
    }

    fn row_to_play(row: &rusqlite::Row) -> rusqlite::Result<PlayEvent> {
        Ok(PlayEvent {
            id: row.get("id")?,
            track_id: row.get("track_id")?,
            played_at: Self::read_timestamp(row, "played_at")?,
            context: row.get("context")?,
            song_mood: Self::read_mood(row, "song_mood")?,
            listener_mood: Self::read_mood(row, "listener_mood")?,
            tagged_at: Self::read_optional_timestamp(row, "tagged_at")?,
        })
    }

    fn row_to_ingestion_record(row: &rusqlite::Row) -> rusqlite::Result<IngestionRecord> {
        let plays: i64 = row.get("plays_inserted")?;
        let tracks: i64 = row.get("tracks_inserted")?;
        let duplicates: i64 = row.get("duplicates_skipped")?;
        Ok(IngestionRecord {
            id: row.get("id")?,
            fetched_at: Self::read_timestamp(row, "fetched_at")?,
            completed_at: Self::read_timestamp(row, "completed_at")?,
            plays_inserted: plays as usize,
            tracks_inserted: tracks as usize,
            duplicates_skipped: duplicates as usize,
        })
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl ListeningStore for SqliteListeningStore {
    fn get_listener(&self, listener_id: &str) -> Result<Option<Listener>> {
        let conn = self.conn.lock().unwrap();
        let listener = conn
            .query_row(
                "SELECT * FROM listeners WHERE listener_id = ?1",
                params![listener_id],
                Self::row_to_listener,
            )
            .optional()?;
        Ok(listener)
    }

    fn get_track(&self, track_id: &str) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                "SELECT * FROM tracks WHERE track_id = ?1",
                params![track_id],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn get_play(&self, play_id: i64) -> Result<Option<PlayEvent>> {
        let conn = self.conn.lock().unwrap();
        let play = conn
            .query_row(
                "SELECT * FROM plays WHERE id = ?1",
                params![play_id],
                Self::row_to_play,
            )
            .optional()?;
        Ok(play)
    }

    fn missing_track_ids(&self, track_ids: &[String]) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        missing_track_ids_in(&conn, track_ids)
    }

    fn reconcile_and_commit(&self, write: &CycleWrite) -> Result<CycleCommit> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin ingestion transaction")?;

        let keys: Vec<PlayKey> = write.plays.iter().map(|play| play.key.clone()).collect();
        let known = known_play_keys_in(&tx, &keys)?;
        let mut seen = HashSet::new();
        let dispositions: Vec<PlayDisposition> = keys
            .iter()
            .map(|key| {
                if known.contains(key) || !seen.insert(key) {
                    PlayDisposition::DuplicatePlayIgnored
                } else {
                    PlayDisposition::New
                }
            })
            .collect();

        let candidate_ids: Vec<String> = write.tracks.iter().map(|t| t.id.clone()).collect();
        let missing: HashSet<String> = missing_track_ids_in(&tx, &candidate_ids)?
            .into_iter()
            .collect();
        if missing.len() < candidate_ids.len() {
            debug!(
                "{} candidate tracks were stored by a concurrent writer",
                candidate_ids.len() - missing.len()
            );
        }

        let now = canonical_timestamp(&Utc::now());
        tx.execute(
            "INSERT INTO listeners (listener_id, display_name, email, first_seen_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(listener_id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email",
            params![
                write.listener.id,
                write.listener.display_name,
                write.listener.email,
                canonical_timestamp(&write.listener.first_seen_at),
            ],
        )
        .context("Failed to upsert listener")?;

        let mut tracks_inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO tracks
                    (track_id, title, artist, duration_ms, popularity, energy, danceability,
                     valence, tempo, first_seen_at, listener_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for track in write.tracks.iter().filter(|t| missing.contains(&t.id)) {
                let features = track.features;
                tracks_inserted += stmt
                    .execute(params![
                        track.id,
                        track.title,
                        track.artist,
                        track.duration_ms,
                        track.popularity,
                        features.map(|f| f.energy),
                        features.map(|f| f.danceability),
                        features.map(|f| f.valence),
                        features.map(|f| f.tempo),
                        now,
                        write.listener.id,
                    ])
                    .with_context(|| format!("Failed to insert track {}", track.id))?;
            }
        }

        let mut plays_inserted = 0;
        {
            let mut stmt =
                tx.prepare("INSERT INTO plays (track_id, played_at, context) VALUES (?1, ?2, ?3)")?;
            for (play, disposition) in write.plays.iter().zip(&dispositions) {
                if *disposition != PlayDisposition::New {
                    continue;
                }
                plays_inserted += stmt
                    .execute(params![play.key.track_id, play.key.played_at, play.context])
                    .with_context(|| {
                        format!(
                            "Failed to insert play of {} at {}",
                            play.key.track_id, play.key.played_at
                        )
                    })?;
            }
        }

        let duplicates_skipped = dispositions
            .iter()
            .filter(|d| **d == PlayDisposition::DuplicatePlayIgnored)
            .count();
        let fetched_at = write.fetched_at.trunc_subsecs(3);
        let completed_at = Utc::now().trunc_subsecs(3);
        tx.execute(
            "INSERT INTO ingestion_runs
                (fetched_at, completed_at, plays_inserted, tracks_inserted, duplicates_skipped)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                canonical_timestamp(&fetched_at),
                canonical_timestamp(&completed_at),
                plays_inserted as i64,
                tracks_inserted as i64,
                duplicates_skipped as i64,
            ],
        )
        .context("Failed to append ingestion record")?;
        let record_id = tx.last_insert_rowid();

        tx.commit().context("Failed to commit ingestion transaction")?;
        debug!(
            "Committed cycle {}: {} tracks, {} plays",
            record_id, tracks_inserted, plays_inserted
        );

        Ok(CycleCommit {
            tracks_inserted,
            plays_inserted,
            duplicates_skipped,
            dispositions,
            record: IngestionRecord {
                id: record_id,
                fetched_at,
                completed_at,
                plays_inserted,
                tracks_inserted,
                duplicates_skipped,
            },
        })
    }

    fn last_ingestion(&self) -> Result<Option<IngestionRecord>> {
        Ok(self.ingestion_history(1)?.into_iter().next())
    }

    fn ingestion_history(&self, limit: usize) -> Result<Vec<IngestionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM ingestion_runs ORDER BY id DESC LIMIT ?1")?;
        let records = stmt
            .query_map(params![limit as i64], Self::row_to_ingestion_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn untagged_plays_page(&self, limit: usize, offset: usize) -> Result<UntaggedPage> {
        let conn = self.conn.lock().unwrap();
        let total_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM plays WHERE tagged_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.track_id, t.title, t.artist, p.played_at, p.context
             FROM plays p
             JOIN tracks t ON t.track_id = p.track_id
             WHERE p.tagged_at IS NULL
             ORDER BY p.played_at DESC, p.id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let plays = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Ok(UntaggedPlay {
                    play_id: row.get("id")?,
                    track_id: row.get("track_id")?,
                    title: row.get("title")?,
                    artist: row.get("artist")?,
                    played_at: Self::read_timestamp(row, "played_at")?,
                    context: row.get("context")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(UntaggedPage {
            plays,
            offset,
            total_count: total_count as usize,
        })
    }

    fn save_mood_tags(
        &self,
        play_id: i64,
        song_mood: MoodScore,
        listener_mood: MoodScore,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE plays SET song_mood = ?1, listener_mood = ?2, tagged_at = ?3 WHERE id = ?4",
            params![
                i64::from(song_mood),
                i64::from(listener_mood),
                canonical_timestamp(&Utc::now()),
                play_id
            ],
        )?;
        Ok(updated > 0)
    }

    fn tagging_progress(&self) -> Result<TaggingProgress> {
        let conn = self.conn.lock().unwrap();
        let (total, tagged): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(tagged_at) FROM plays",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(TaggingProgress {
            total_plays: total as usize,
            tagged_plays: tagged as usize,
        })
    }

    fn count_tracks(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM tracks")
    }

    fn count_plays(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM plays")
    }

    fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name()).collect()
    }

    fn browse_table(&self, name: &str, limit: usize) -> Result<Option<TableRows>> {
        let Some(table) = self.tables.iter().find(|t| t.name() == name) else {
            return Ok(None);
        };
        let conn = self.conn.lock().unwrap();
        table.read_rows(&conn, limit).map(Some)
    }
}
