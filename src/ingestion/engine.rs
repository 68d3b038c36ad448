//! Ingestion cycle: fetch recent plays, enrich unseen tracks with audio
//! features and hand the batch to the store, which drops plays already stored
//! and commits the rest in one transaction.

use crate::config::IngestionSettings;
use crate::credentials::CredentialStore;
use crate::error::SyncError;
use crate::listening_store::{
    AudioFeatures, CycleWrite, Listener, ListeningStore, NewPlay, NewTrack, PlayDisposition,
    PlayKey,
};
use crate::platform::{ListeningPlatform, RecentPlay};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub inserted_tracks: usize,
    pub inserted_plays: usize,
    pub duplicates_skipped: usize,
    /// Plays returned by the platform, duplicates included.
    pub fetched: usize,
    pub ingestion_id: i64,
    pub fetched_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

pub struct IngestionEngine {
    credentials: Arc<CredentialStore>,
    platform: Arc<dyn ListeningPlatform>,
    store: Arc<dyn ListeningStore>,
    settings: IngestionSettings,
    cycle_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<Listener>>,
}

impl IngestionEngine {
    pub fn new(
        credentials: Arc<CredentialStore>,
        platform: Arc<dyn ListeningPlatform>,
        store: Arc<dyn ListeningStore>,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            credentials,
            platform,
            store,
            settings,
            cycle_lock: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
        }
    }

    /// Runs one cycle. A cycle already running makes this fail with
    /// `CycleInProgress` instead of waiting.
    ///
    /// Nothing is written unless the cycle reaches the final commit, which
    /// stores the new rows together with the ingestion record.
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let _cycle = self
            .cycle_lock
            .try_lock()
            .map_err(|_| SyncError::CycleInProgress)?;
        let started = Instant::now();

        self.credentials
            .ensure_valid(self.settings.refresh_margin)
            .await?;
        let listener = self.resolve_listener().await?;

        let fetched_at = Utc::now();
        let plays = self
            .platform
            .fetch_recent_plays(self.settings.recent_plays_limit)
            .await?;

        let tracks = self.new_tracks(&plays).await?;
        let write = CycleWrite {
            listener,
            tracks,
            plays: plays
                .iter()
                .map(|play| NewPlay {
                    key: PlayKey::new(&play.track.id, &play.played_at),
                    context: play.context.clone(),
                })
                .collect(),
            fetched_at,
        };
        let commit = self.store.reconcile_and_commit(&write)?;
        for (play, disposition) in plays.iter().zip(&commit.dispositions) {
            if *disposition == PlayDisposition::DuplicatePlayIgnored {
                debug!("Ignored duplicate play of {} at {}", play.track.id, play.played_at);
            }
        }

        info!(
            "Ingestion cycle {} done in {}ms: {} fetched, {} new tracks, {} new plays, {} duplicates",
            commit.record.id,
            started.elapsed().as_millis(),
            plays.len(),
            commit.tracks_inserted,
            commit.plays_inserted,
            commit.duplicates_skipped
        );

        Ok(CycleReport {
            inserted_tracks: commit.tracks_inserted,
            inserted_plays: commit.plays_inserted,
            duplicates_skipped: commit.duplicates_skipped,
            fetched: plays.len(),
            ingestion_id: commit.record.id,
            fetched_at: commit.record.fetched_at,
            completed_at: commit.record.completed_at,
        })
    }

    /// Drops the cached listener profile, e.g. after logout.
    pub fn forget_listener(&self) {
        *self.listener.lock().unwrap() = None;
    }

    pub fn cached_listener(&self) -> Option<Listener> {
        self.listener.lock().unwrap().clone()
    }

    async fn resolve_listener(&self) -> Result<Listener, SyncError> {
        if let Some(listener) = self.cached_listener() {
            return Ok(listener);
        }

        let profile = self.platform.fetch_profile().await?;
        let first_seen_at = self
            .store
            .get_listener(&profile.id)?
            .map(|stored| stored.first_seen_at)
            .unwrap_or_else(Utc::now);
        let listener = Listener {
            id: profile.id,
            display_name: profile.display_name,
            email: profile.email,
            first_seen_at,
        };
        debug!("Resolved listener {}", listener.id);
        *self.listener.lock().unwrap() = Some(listener.clone());
        Ok(listener)
    }

    /// Tracks referenced by `plays` that the store does not have yet, with
    /// features attached when the platform provides them. The store checks
    /// again when committing, so this read only decides what to enrich.
    async fn new_tracks(&self, plays: &[RecentPlay]) -> Result<Vec<NewTrack>, SyncError> {
        let mut first_play: HashMap<&str, &RecentPlay> = HashMap::new();
        let mut referenced = Vec::new();
        for play in plays {
            if first_play.insert(play.track.id.as_str(), play).is_none() {
                referenced.push(play.track.id.clone());
            }
        }

        let missing = self.store.missing_track_ids(&referenced)?;
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let features = self.enrich(&missing).await?;
        Ok(missing
            .iter()
            .filter_map(|id| first_play.get(id.as_str()))
            .map(|play| NewTrack {
                id: play.track.id.clone(),
                title: play.track.title.clone(),
                artist: play.track.artist.clone(),
                duration_ms: play.track.duration_ms,
                popularity: play.track.popularity,
                features: features.get(&play.track.id).copied().flatten(),
            })
            .collect())
    }

    async fn enrich(
        &self,
        track_ids: &[String],
    ) -> Result<HashMap<String, Option<AudioFeatures>>, SyncError> {
        match self.platform.fetch_audio_features(track_ids).await {
            Ok(features) => Ok(features),
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                warn!(
                    "Audio features unavailable for {} tracks, storing them without: {}",
                    track_ids.len(),
                    e
                );
                Ok(HashMap::new())
            }
        }
    }
}
