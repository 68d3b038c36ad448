//! HTTP client for the listening platform's Web API.

use super::models::{
    AudioFeaturesResponse, PlatformProfile, PlayHistoryItem, PlayedTrack, RecentPlay,
    RecentlyPlayedResponse, TopTracksResponse, WireTrack,
};
use super::retry_policy::{parse_retry_after, RetryPolicy};
use crate::config::PlatformSettings;
use crate::credentials::CredentialStore;
use crate::error::{AuthError, SyncError};
use crate::listening_store::AudioFeatures;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The history endpoint never returns more than this many plays.
pub const RECENT_PLAYS_CEILING: usize = 50;

/// Largest page the top tracks endpoint accepts.
pub const TOP_TRACKS_CEILING: usize = 50;

const MAX_LOGGED_BODY_CHARS: usize = 512;

/// What the ingestion engine and the live views need from the platform.
#[async_trait]
pub trait ListeningPlatform: Send + Sync {
    async fn fetch_profile(&self) -> Result<PlatformProfile, SyncError>;

    /// Up to `limit` most recent plays, newest first. `limit` is clamped to
    /// `1..=RECENT_PLAYS_CEILING`.
    async fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<RecentPlay>, SyncError>;

    /// The listener's top tracks, clamped to `1..=TOP_TRACKS_CEILING`.
    async fn fetch_top_tracks(&self, limit: usize) -> Result<Vec<PlayedTrack>, SyncError>;

    /// Feature vectors keyed by track id. Every distinct input id is a key;
    /// ids the platform has no features for, or whose batch failed with a
    /// non-auth error, map to `None`. Auth errors abort the call.
    async fn fetch_audio_features(
        &self,
        track_ids: &[String],
    ) -> Result<HashMap<String, Option<AudioFeatures>>, SyncError>;
}

pub struct PlatformClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    retry_policy: RetryPolicy,
    refresh_margin: Duration,
    features_batch_size: usize,
}

impl PlatformClient {
    pub fn new(
        settings: &PlatformSettings,
        credentials: Arc<CredentialStore>,
        refresh_margin: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_sec))
            .build()
            .context("Failed to create platform HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            credentials,
            retry_policy: RetryPolicy::new(settings),
            refresh_margin,
            features_batch_size: settings.features_batch_size.max(1),
        })
    }

    /// Authenticated GET with the shared failure policy: 429 backs off and
    /// retries, a 401 triggers one refresh and one retry, anything else
    /// non-2xx fails immediately.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let url = format!("{}{}", self.base_url, path);
        let mut credential = self.credentials.ensure_valid(self.refresh_margin).await?;
        let mut rate_limited_retries = 0;
        let mut refreshed_after_rejection = false;

        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&credential.access_token)
                .send()
                .await
                .map_err(|e| SyncError::Network {
                    status: None,
                    message: format!("GET {} failed: {}", path, e),
                })?;

            let status = response.status();
            if status.is_success() {
                return response.json::<T>().await.map_err(|e| {
                    SyncError::InvalidResponse(format!("GET {}: {}", path, e))
                });
            }

            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    if !self.retry_policy.should_retry(rate_limited_retries) {
                        warn!("GET {} still rate limited, giving up", path);
                        return Err(SyncError::RateLimited {
                            attempts: rate_limited_retries + 1,
                        });
                    }
                    let wait = self
                        .retry_policy
                        .wait_before_retry(rate_limited_retries, parse_retry_after(response.headers()));
                    info!(
                        "GET {} rate limited, retrying in {}ms (retry {}/{})",
                        path,
                        wait.as_millis(),
                        rate_limited_retries + 1,
                        self.retry_policy.max_retries
                    );
                    tokio::time::sleep(wait).await;
                    rate_limited_retries += 1;
                }
                StatusCode::UNAUTHORIZED => {
                    if refreshed_after_rejection {
                        return Err(AuthError::Rejected.into());
                    }
                    info!("GET {} returned 401, refreshing credential", path);
                    refreshed_after_rejection = true;
                    credential = self
                        .credentials
                        .refresh_rejected(&credential.access_token)
                        .await?;
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    let body: String = body.chars().take(MAX_LOGGED_BODY_CHARS).collect();
                    return Err(SyncError::Network {
                        status: Some(status.as_u16()),
                        message: format!("GET {} returned {}: {}", path, status, body),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ListeningPlatform for PlatformClient {
    async fn fetch_profile(&self) -> Result<PlatformProfile, SyncError> {
        self.get_json("/v1/me").await
    }

    async fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<RecentPlay>, SyncError> {
        let limit = limit.clamp(1, RECENT_PLAYS_CEILING);
        let response: RecentlyPlayedResponse = self
            .get_json(&format!("/v1/me/player/recently-played?limit={}", limit))
            .await?;

        let mut plays: Vec<RecentPlay> = response
            .items
            .into_iter()
            .filter_map(PlayHistoryItem::into_recent_play)
            .collect();
        plays.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        plays.truncate(RECENT_PLAYS_CEILING);

        debug!("Fetched {} recent plays (limit {})", plays.len(), limit);
        Ok(plays)
    }

    async fn fetch_top_tracks(&self, limit: usize) -> Result<Vec<PlayedTrack>, SyncError> {
        let limit = limit.clamp(1, TOP_TRACKS_CEILING);
        let response: TopTracksResponse = self
            .get_json(&format!("/v1/me/top/tracks?limit={}", limit))
            .await?;
        Ok(response
            .items
            .into_iter()
            .filter_map(WireTrack::into_played_track)
            .collect())
    }

    async fn fetch_audio_features(
        &self,
        track_ids: &[String],
    ) -> Result<HashMap<String, Option<AudioFeatures>>, SyncError> {
        let mut seen = HashSet::new();
        let distinct: Vec<&String> = track_ids.iter().filter(|id| seen.insert(*id)).collect();

        let mut features: HashMap<String, Option<AudioFeatures>> =
            distinct.iter().map(|id| ((*id).clone(), None)).collect();

        for batch in distinct.chunks(self.features_batch_size) {
            let ids = batch
                .iter()
                .map(|id| urlencoding::encode(id).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            let response: AudioFeaturesResponse =
                match self.get_json(&format!("/v1/audio-features?ids={}", ids)).await {
                    Ok(response) => response,
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => {
                        warn!(
                            "Audio features batch of {} tracks failed, leaving them without features: {}",
                            batch.len(),
                            e
                        );
                        continue;
                    }
                };

            for wire in response.audio_features.into_iter().flatten() {
                if let Some(slot) = features.get_mut(&wire.id) {
                    *slot = Some(wire.into());
                }
            }
        }

        debug!(
            "Fetched audio features for {} of {} tracks",
            features.values().filter(|f| f.is_some()).count(),
            features.len()
        );
        Ok(features)
    }
}
