//! Test environments and wire-format fixtures
//!
//! Each environment gets its own temp directory holding the listening
//! database and the credential file, wired to a running `MockPlatform`.

use super::constants::*;
use super::mock_platform::MockPlatform;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use moodsync_server::config::{AppConfig, CliConfig};
use moodsync_server::credentials::{AccountsClient, Credential, CredentialStore, TokenFile};
use moodsync_server::platform::PlatformClient;
use moodsync_server::HistoryService;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEnv {
    pub config: AppConfig,
    _temp_dir: TempDir,
}

impl TestEnv {
    /// Environment whose credential file holds a token expiring in
    /// `expires_in_secs`. `None` leaves the file absent.
    pub fn new(platform: &MockPlatform, expires_in_secs: Option<i64>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            client_id: Some(CLIENT_ID.to_string()),
            client_secret: Some(CLIENT_SECRET.to_string()),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            ..Default::default()
        };
        let mut config = AppConfig::resolve(&cli, None).expect("Failed to resolve test config");
        config.platform.api_base_url = platform.base_url.clone();
        config.platform.accounts_base_url = platform.base_url.clone();
        config.platform.request_timeout_sec = 5;
        config.platform.max_retries = 3;
        config.platform.initial_backoff_ms = 10;
        config.platform.max_backoff_ms = 50;
        config.platform.features_batch_size = 100;

        if let Some(secs) = expires_in_secs {
            TokenFile::new(&config.credential_file)
                .save(&credential_expiring_in(secs))
                .expect("Failed to write credential file");
        }

        Self {
            config,
            _temp_dir: temp_dir,
        }
    }

    pub fn service(&self) -> HistoryService {
        HistoryService::from_config(&self.config).expect("Failed to build service")
    }

    /// A platform client with its own credential store, bypassing the service.
    pub fn platform_client(&self) -> (Arc<CredentialStore>, PlatformClient) {
        let platform = &self.config.platform;
        let exchanger = AccountsClient::new(
            &platform.accounts_base_url,
            platform.client.clone(),
            platform.request_timeout_sec,
        )
        .expect("Failed to build accounts client");
        let credentials = Arc::new(
            CredentialStore::open(TokenFile::new(&self.config.credential_file), Arc::new(exchanger))
                .expect("Failed to open credential store"),
        );
        let client = PlatformClient::new(
            platform,
            credentials.clone(),
            self.config.ingestion.refresh_margin,
        )
        .expect("Failed to build platform client");
        (credentials, client)
    }

    pub fn stored_credential(&self) -> Option<Credential> {
        TokenFile::new(&self.config.credential_file)
            .load()
            .expect("Failed to read credential file")
    }
}

pub fn credential_expiring_in(secs: i64) -> Credential {
    Credential {
        access_token: INITIAL_ACCESS_TOKEN.to_string(),
        refresh_token: INITIAL_REFRESH_TOKEN.to_string(),
        token_type: "Bearer".to_string(),
        expires_in: 3600,
        scope: "user-read-recently-played".to_string(),
        expires_at: Utc::now().timestamp() + secs,
    }
}

/// One play history item, `minutes` after a fixed base instant.
pub fn play(track_id: &str, minutes: i64) -> Value {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let played_at = base + ChronoDuration::minutes(minutes);
    json!({
        "track": {
            "id": track_id,
            "name": format!("Song {}", track_id),
            "artists": [{"name": "Mock Artist"}],
            "duration_ms": 180000,
            "popularity": 42
        },
        "played_at": played_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "context": {"type": "playlist", "uri": "spotify:playlist:mock"}
    })
}

/// Play history items, newest first like the platform returns them.
pub fn plays(entries: &[(&str, i64)]) -> Vec<Value> {
    let mut entries = entries.to_vec();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries
        .into_iter()
        .map(|(track_id, minutes)| play(track_id, minutes))
        .collect()
}

/// `count` distinct tracks, one play each.
pub fn distinct_plays(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| play(&format!("track-{:03}", i), i as i64))
        .rev()
        .collect()
}

/// The twelve plays over nine tracks used by the ingestion scenarios.
pub fn twelve_plays_nine_tracks() -> Vec<(String, i64)> {
    (0..12)
        .map(|i| (format!("t{}", i % 9), i as i64 * 4))
        .collect()
}

pub fn as_entries(entries: &[(String, i64)]) -> Vec<(&str, i64)> {
    entries.iter().map(|(id, m)| (id.as_str(), *m)).collect()
}
