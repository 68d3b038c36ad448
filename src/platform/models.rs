//! Wire types of the platform's Web API and the domain values built from them.

use crate::listening_store::{parse_timestamp, AudioFeatures};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Track metadata as it appears inside a play history item or a top list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayedTrack {
    pub id: String,
    pub title: String,
    /// Artist names joined with ", ".
    pub artist: String,
    pub duration_ms: Option<i64>,
    pub popularity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentPlay {
    pub track: PlayedTrack,
    pub played_at: DateTime<Utc>,
    /// Playback context URI, or its type when the platform gives no URI.
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecentlyPlayedResponse {
    #[serde(default)]
    pub items: Vec<PlayHistoryItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TopTracksResponse {
    #[serde(default)]
    pub items: Vec<WireTrack>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlayHistoryItem {
    pub track: WireTrack,
    pub played_at: String,
    #[serde(default)]
    pub context: Option<WireContext>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireTrack {
    /// Absent for local files, which cannot be looked up.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<WireArtist>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub popularity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireArtist {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireContext {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AudioFeaturesResponse {
    #[serde(default)]
    pub audio_features: Vec<Option<WireAudioFeatures>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireAudioFeatures {
    pub id: String,
    pub energy: f64,
    pub danceability: f64,
    pub valence: f64,
    pub tempo: f64,
}

impl From<WireAudioFeatures> for AudioFeatures {
    fn from(wire: WireAudioFeatures) -> Self {
        Self {
            energy: wire.energy,
            danceability: wire.danceability,
            valence: wire.valence,
            tempo: wire.tempo,
        }
    }
}

impl WireTrack {
    /// `None` for local files, which have no id.
    pub fn into_played_track(self) -> Option<PlayedTrack> {
        let Some(id) = self.id.filter(|id| !id.is_empty()) else {
            warn!("Skipping track '{}' without an id", self.name);
            return None;
        };
        let artist = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Some(PlayedTrack {
            id,
            title: self.name,
            artist,
            duration_ms: self.duration_ms,
            popularity: self.popularity,
        })
    }
}

impl PlayHistoryItem {
    /// Converts the item, skipping local files and unparsable timestamps.
    pub fn into_recent_play(self) -> Option<RecentPlay> {
        let played_at = match parse_timestamp(&self.played_at) {
            Ok(played_at) => played_at,
            Err(e) => {
                warn!("Skipping play of '{}': {:#}", self.track.name, e);
                return None;
            }
        };
        let context = self.context.and_then(|c| c.uri.or(c.kind));
        let track = self.track.into_played_track()?;

        Some(RecentPlay {
            track,
            played_at,
            context,
        })
    }
}
