//! In-process fakes shared by unit tests.

use crate::credentials::{Credential, CredentialStore, TokenExchanger, TokenFile, TokenResponse};
use crate::error::{AuthError, SyncError};
use crate::listening_store::AudioFeatures;
use crate::platform::{ListeningPlatform, PlatformProfile, PlayedTrack, RecentPlay};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn credential_expiring_in(seconds: i64) -> Credential {
    Credential {
        access_token: "initial-access".to_string(),
        refresh_token: "initial-refresh".to_string(),
        token_type: "Bearer".to_string(),
        expires_in: 3600,
        scope: "user-read-recently-played".to_string(),
        expires_at: Utc::now().timestamp() + seconds,
    }
}

/// Token exchanger that counts refreshes and hands out numbered tokens.
pub struct CountingExchanger {
    pub refresh_calls: AtomicUsize,
    delay: Duration,
    revoked: bool,
    lifetime_secs: i64,
}

impl CountingExchanger {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            delay,
            revoked: false,
            lifetime_secs: 3600,
        }
    }

    /// Refreshes hand out tokens that expire after `secs`.
    pub fn with_lifetime(secs: i64) -> Self {
        Self {
            lifetime_secs: secs,
            ..Self::new()
        }
    }

    pub fn revoked() -> Self {
        Self {
            revoked: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl TokenExchanger for CountingExchanger {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://accounts.test/authorize?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AuthError> {
        Ok(TokenResponse {
            access_token: format!("code-access-{}", code),
            token_type: Some("Bearer".to_string()),
            expires_in: 3600,
            refresh_token: Some("code-refresh".to_string()),
            scope: Some("user-read-recently-played".to_string()),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.revoked {
            return Err(AuthError::ReauthenticationRequired);
        }
        Ok(TokenResponse {
            access_token: format!("refreshed-access-{}", call),
            token_type: None,
            expires_in: self.lifetime_secs,
            refresh_token: None,
            scope: None,
        })
    }
}

/// Credential store backed by a temp dir, optionally seeded with a credential.
pub fn temp_credential_store(
    credential: Option<Credential>,
) -> (TempDir, Arc<CredentialStore>, Arc<CountingExchanger>) {
    let dir = TempDir::new().unwrap();
    let file = TokenFile::new(dir.path().join("tokens.json"));
    if let Some(credential) = credential {
        file.save(&credential).unwrap();
    }
    let exchanger = Arc::new(CountingExchanger::new());
    let store = Arc::new(CredentialStore::open(file, exchanger.clone()).unwrap());
    (dir, store, exchanger)
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn recent_play(track_id: &str, minutes_after_base: i64) -> RecentPlay {
    RecentPlay {
        track: PlayedTrack {
            id: track_id.to_string(),
            title: format!("Title {}", track_id),
            artist: "Some Artist".to_string(),
            duration_ms: Some(200_000),
            popularity: Some(50),
        },
        played_at: base_time() + ChronoDuration::minutes(minutes_after_base),
        context: None,
    }
}

pub fn features_for(track_id: &str) -> AudioFeatures {
    let seed = track_id.len() as f64 / 100.0;
    AudioFeatures {
        energy: 0.5 + seed,
        danceability: 0.4,
        valence: 0.3,
        tempo: 110.0,
    }
}

/// Scripted platform. Plays are returned newest first, like the real one.
pub struct FakePlatform {
    pub plays: Mutex<Vec<RecentPlay>>,
    pub fetch_delay: Mutex<Duration>,
    pub features_error: Mutex<Option<fn() -> SyncError>>,
    pub features_requests: Mutex<Vec<Vec<String>>>,
    pub profile_calls: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            plays: Mutex::new(Vec::new()),
            fetch_delay: Mutex::new(Duration::ZERO),
            features_error: Mutex::new(None),
            features_requests: Mutex::new(Vec::new()),
            profile_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_plays(&self, mut plays: Vec<RecentPlay>) {
        plays.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        *self.plays.lock().unwrap() = plays;
    }

    pub fn fail_features_with(&self, make_error: fn() -> SyncError) {
        *self.features_error.lock().unwrap() = Some(make_error);
    }
}

#[async_trait]
impl ListeningPlatform for FakePlatform {
    async fn fetch_profile(&self) -> Result<PlatformProfile, SyncError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PlatformProfile {
            id: "listener-1".to_string(),
            display_name: Some("Listener One".to_string()),
            email: Some("one@example.com".to_string()),
        })
    }

    async fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<RecentPlay>, SyncError> {
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let plays = self.plays.lock().unwrap();
        Ok(plays.iter().take(limit.min(50)).cloned().collect())
    }

    async fn fetch_top_tracks(&self, limit: usize) -> Result<Vec<PlayedTrack>, SyncError> {
        let mut seen = std::collections::HashSet::new();
        let plays = self.plays.lock().unwrap();
        Ok(plays
            .iter()
            .filter(|p| seen.insert(p.track.id.clone()))
            .take(limit)
            .map(|p| p.track.clone())
            .collect())
    }

    async fn fetch_audio_features(
        &self,
        track_ids: &[String],
    ) -> Result<HashMap<String, Option<AudioFeatures>>, SyncError> {
        self.features_requests
            .lock()
            .unwrap()
            .push(track_ids.to_vec());
        if let Some(make_error) = *self.features_error.lock().unwrap() {
            return Err(make_error());
        }
        Ok(track_ids
            .iter()
            .map(|id| (id.clone(), Some(features_for(id))))
            .collect())
    }
}
