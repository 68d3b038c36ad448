//! SQLite schema for the listening history database.
//!
//! Version 1 holds listeners, tracks, plays and a minimal ingestion audit.
//! Version 2 extends the audit rows with per-cycle track and duplicate counts.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

pub const LISTENERS_TABLE: Table = Table {
    name: "listeners",
    columns: &[
        sqlite_column!("listener_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("display_name", &SqlType::Text),
        sqlite_column!("email", &SqlType::Text),
        sqlite_column!("first_seen_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

pub const TRACKS_TABLE: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("track_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("popularity", &SqlType::Integer),
        sqlite_column!("genre", &SqlType::Text),
        sqlite_column!("energy", &SqlType::Real),
        sqlite_column!("danceability", &SqlType::Real),
        sqlite_column!("valence", &SqlType::Real),
        sqlite_column!("tempo", &SqlType::Real),
        sqlite_column!("mood", &SqlType::Text),
        sqlite_column!("first_seen_at", &SqlType::Text, non_null = true),
        sqlite_column!(
            "listener_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "listeners",
                foreign_column: "listener_id",
                on_delete: ForeignKeyOnChange::Restrict,
            })
        ),
    ],
    indices: &[("idx_tracks_listener", "listener_id")],
    unique_constraints: &[],
};

pub const PLAYS_TABLE: Table = Table {
    name: "plays",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "track_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "tracks",
                foreign_column: "track_id",
                on_delete: ForeignKeyOnChange::Restrict,
            })
        ),
        sqlite_column!("played_at", &SqlType::Text, non_null = true),
        sqlite_column!("context", &SqlType::Text),
        sqlite_column!("song_mood", &SqlType::Integer),
        sqlite_column!("listener_mood", &SqlType::Integer),
        sqlite_column!("tagged_at", &SqlType::Text),
    ],
    indices: &[
        ("idx_plays_played_at", "played_at DESC"),
        ("idx_plays_tagged_at", "tagged_at"),
    ],
    unique_constraints: &[&["track_id", "played_at"]],
};

const INGESTION_RUNS_TABLE_V1: Table = Table {
    name: "ingestion_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("fetched_at", &SqlType::Text, non_null = true),
        sqlite_column!("completed_at", &SqlType::Text, non_null = true),
        sqlite_column!("plays_inserted", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_ingestion_runs_completed_at", "completed_at DESC")],
    unique_constraints: &[],
};

pub const INGESTION_RUNS_TABLE: Table = Table {
    name: "ingestion_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("fetched_at", &SqlType::Text, non_null = true),
        sqlite_column!("completed_at", &SqlType::Text, non_null = true),
        sqlite_column!("plays_inserted", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "tracks_inserted",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "duplicates_skipped",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_ingestion_runs_completed_at", "completed_at DESC")],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute(
        "ALTER TABLE ingestion_runs ADD COLUMN tracks_inserted INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute(
        "ALTER TABLE ingestion_runs ADD COLUMN duplicates_skipped INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

pub const LISTENING_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            LISTENERS_TABLE,
            TRACKS_TABLE,
            PLAYS_TABLE,
            INGESTION_RUNS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            LISTENERS_TABLE,
            TRACKS_TABLE,
            PLAYS_TABLE,
            INGESTION_RUNS_TABLE,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::{prepare_database, read_schema_version};
    use rusqlite::Connection;

    #[test]
    fn latest_schema_creates_and_validates() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare_database(&mut conn, true, LISTENING_VERSIONED_SCHEMAS, "listening").unwrap();

        LISTENING_VERSIONED_SCHEMAS.last().unwrap().validate(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn version_one_database_is_migrated() {
        let mut conn = Connection::open_in_memory().unwrap();
        LISTENING_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        conn.execute(
            "INSERT INTO ingestion_runs (fetched_at, completed_at, plays_inserted) VALUES ('2024-01-01T00:00:00.000Z', '2024-01-01T00:00:01.000Z', 4)",
            [],
        )
        .unwrap();

        prepare_database(&mut conn, false, LISTENING_VERSIONED_SCHEMAS, "listening").unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), 2);
        let (plays, tracks, duplicates): (i64, i64, i64) = conn
            .query_row(
                "SELECT plays_inserted, tracks_inserted, duplicates_skipped FROM ingestion_runs",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!((plays, tracks, duplicates), (4, 0, 0));
    }

    #[test]
    fn play_uniqueness_is_enforced_by_sqlite() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare_database(&mut conn, true, LISTENING_VERSIONED_SCHEMAS, "listening").unwrap();
        conn.execute(
            "INSERT INTO listeners (listener_id, first_seen_at) VALUES ('u1', '2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tracks (track_id, title, artist, first_seen_at, listener_id) VALUES ('t1', 'Song', 'Band', '2024-01-01T00:00:00.000Z', 'u1')",
            [],
        )
        .unwrap();
        let insert_play =
            "INSERT INTO plays (track_id, played_at) VALUES ('t1', '2024-01-01T00:00:00.000Z')";

        conn.execute(insert_play, []).unwrap();
        assert!(conn.execute(insert_play, []).is_err());
    }

    #[test]
    fn plays_require_an_existing_track() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare_database(&mut conn, true, LISTENING_VERSIONED_SCHEMAS, "listening").unwrap();

        let result = conn.execute(
            "INSERT INTO plays (track_id, played_at) VALUES ('ghost', '2024-01-01T00:00:00.000Z')",
            [],
        );
        assert!(result.is_err());
    }
}
