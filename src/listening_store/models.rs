use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical text form of a play timestamp: UTC, millisecond precision, `Z`
/// suffix. Equal instants always produce equal strings, which is what the
/// `(track_id, played_at)` uniqueness relies on.
pub fn canonical_timestamp(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid RFC 3339 timestamp: {}", text))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub energy: f64,
    pub danceability: f64,
    pub valence: f64,
    pub tempo: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_ms: Option<i64>,
    pub popularity: Option<i64>,
    pub genre: Option<String>,
    pub features: Option<AudioFeatures>,
    pub mood: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub listener_id: String,
}

/// Track row to insert during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_ms: Option<i64>,
    pub popularity: Option<i64>,
    pub features: Option<AudioFeatures>,
}

/// Deduplication key of a play event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayKey {
    pub track_id: String,
    pub played_at: String,
}

impl PlayKey {
    pub fn new(track_id: &str, played_at: &DateTime<Utc>) -> Self {
        Self {
            track_id: track_id.to_string(),
            played_at: canonical_timestamp(played_at),
        }
    }
}

/// What a cycle decided for one fetched play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayDisposition {
    New,
    /// Same (track, played_at) as a stored play or an earlier one in the batch.
    DuplicatePlayIgnored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPlay {
    pub key: PlayKey,
    pub context: Option<String>,
}

/// Mood score on the 1..=5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct MoodScore(u8);

impl MoodScore {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 5;

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for MoodScore {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(format!(
                "mood must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            ))
        }
    }
}

impl From<MoodScore> for i64 {
    fn from(score: MoodScore) -> Self {
        score.0 as i64
    }
}

impl fmt::Display for MoodScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayEvent {
    pub id: i64,
    pub track_id: String,
    pub played_at: DateTime<Utc>,
    pub context: Option<String>,
    pub song_mood: Option<MoodScore>,
    pub listener_mood: Option<MoodScore>,
    pub tagged_at: Option<DateTime<Utc>>,
}

/// Untagged play joined with the track fields a tagging UI shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UntaggedPlay {
    pub play_id: i64,
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub played_at: DateTime<Utc>,
    pub context: Option<String>,
}

/// One page of the untagged backlog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UntaggedPage {
    pub plays: Vec<UntaggedPlay>,
    pub offset: usize,
    /// Untagged plays in the whole backlog, not just this page.
    pub total_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaggingProgress {
    pub total_plays: usize,
    pub tagged_plays: usize,
}

impl TaggingProgress {
    pub fn untagged_plays(&self) -> usize {
        self.total_plays.saturating_sub(self.tagged_plays)
    }
}

/// Audit row appended once per ingestion cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionRecord {
    pub id: i64,
    pub fetched_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub plays_inserted: usize,
    pub tracks_inserted: usize,
    pub duplicates_skipped: usize,
}

/// One ingestion cycle's input to the store.
///
/// `plays` is the whole fetched batch, duplicates included; the store sorts
/// them out inside the write transaction. `tracks` are candidates: ones
/// already stored by then are left untouched.
#[derive(Debug, Clone)]
pub struct CycleWrite {
    pub listener: Listener,
    pub tracks: Vec<NewTrack>,
    pub plays: Vec<NewPlay>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleCommit {
    pub tracks_inserted: usize,
    pub plays_inserted: usize,
    pub duplicates_skipped: usize,
    /// One entry per play of the write, in the same order.
    pub dispositions: Vec<PlayDisposition>,
    pub record: IngestionRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn canonical_timestamp_normalizes_offsets() {
        let utc = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        let shifted = parse_timestamp("2024-03-01T12:00:00.000+02:00").unwrap();

        assert_eq!(canonical_timestamp(&utc), "2024-03-01T10:00:00.000Z");
        assert_eq!(canonical_timestamp(&utc), canonical_timestamp(&shifted));
    }

    #[test]
    fn play_keys_from_equal_instants_match() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let local = offset
            .with_ymd_and_hms(2024, 3, 1, 11, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let utc = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        assert_eq!(PlayKey::new("t1", &local), PlayKey::new("t1", &utc));
        assert_ne!(PlayKey::new("t1", &utc), PlayKey::new("t2", &utc));
    }

    #[test]
    fn mood_score_bounds() {
        assert!(MoodScore::try_from(0).is_err());
        assert_eq!(MoodScore::try_from(1).unwrap().value(), 1);
        assert_eq!(MoodScore::try_from(5).unwrap().value(), 5);
        assert!(MoodScore::try_from(6).is_err());
    }

    #[test]
    fn mood_score_serializes_as_number() {
        let score = MoodScore::try_from(4).unwrap();
        assert_eq!(serde_json::to_string(&score).unwrap(), "4");
        assert!(serde_json::from_str::<MoodScore>("9").is_err());
    }

    #[test]
    fn invalid_timestamp_is_an_error() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
