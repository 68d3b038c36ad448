//! Operations offered to the UI and routing layers.

use crate::config::{AppConfig, IngestionSettings};
use crate::credentials::{AccountsClient, Credential, CredentialStore, TokenFile};
use crate::error::{AuthError, SyncError, TaggingError};
use crate::ingestion::{CycleReport, IngestionEngine};
use crate::listening_store::{
    IngestionRecord, ListeningStore, MoodScore, SqliteListeningStore, TableRows, TaggingProgress,
    UntaggedPage, UntaggedPlay,
};
use crate::platform::{ListeningPlatform, PlatformClient, PlatformProfile, PlayedTrack, RecentPlay};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long an issued login `state` stays redeemable.
const LOGIN_STATE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthStatus {
    pub logged_in: bool,
    /// Fresh for at least the configured refresh margin.
    pub fresh: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginRedirect {
    pub state: String,
    pub url: String,
}

pub struct HistoryService {
    credentials: Arc<CredentialStore>,
    platform: Arc<dyn ListeningPlatform>,
    store: Arc<dyn ListeningStore>,
    engine: IngestionEngine,
    settings: IngestionSettings,
    pending_logins: Mutex<HashMap<String, Instant>>,
}

impl HistoryService {
    pub fn new(
        credentials: Arc<CredentialStore>,
        platform: Arc<dyn ListeningPlatform>,
        store: Arc<dyn ListeningStore>,
        settings: IngestionSettings,
    ) -> Self {
        let engine = IngestionEngine::new(
            credentials.clone(),
            platform.clone(),
            store.clone(),
            settings.clone(),
        );
        Self {
            credentials,
            platform,
            store,
            engine,
            settings,
            pending_logins: Mutex::new(HashMap::new()),
        }
    }

    /// Wires the SQLite store, the credential file and the platform clients
    /// described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let db_path = config.listening_db_path();
        let store = SqliteListeningStore::new(&db_path)
            .with_context(|| format!("Failed to open listening database at {:?}", db_path))?;

        let exchanger = AccountsClient::new(
            &config.platform.accounts_base_url,
            config.platform.client.clone(),
            config.platform.request_timeout_sec,
        )?;
        let credentials = Arc::new(CredentialStore::open(
            TokenFile::new(&config.credential_file),
            Arc::new(exchanger),
        )?);
        let platform = PlatformClient::new(
            &config.platform,
            credentials.clone(),
            config.ingestion.refresh_margin,
        )?;

        Ok(Self::new(
            credentials,
            Arc::new(platform),
            Arc::new(store),
            config.ingestion.clone(),
        ))
    }

    pub async fn get_valid_credential(&self) -> Result<Credential, AuthError> {
        self.credentials
            .ensure_valid(self.settings.refresh_margin)
            .await
    }

    pub async fn run_ingestion_cycle(&self) -> Result<CycleReport, SyncError> {
        self.engine.run_cycle().await
    }

    pub fn get_last_sync(&self) -> Result<Option<IngestionRecord>, SyncError> {
        Ok(self.store.last_ingestion()?)
    }

    pub fn ingestion_history(&self, limit: usize) -> Result<Vec<IngestionRecord>, SyncError> {
        Ok(self.store.ingestion_history(limit)?)
    }

    /// Most recent plays without mood tags, newest first.
    pub fn list_untagged_plays(&self, limit: usize) -> Result<Vec<UntaggedPlay>, SyncError> {
        Ok(self.store.list_untagged_plays(limit)?)
    }

    /// A page of the untagged backlog with its total size.
    pub fn untagged_plays_page(&self, limit: usize, offset: usize) -> Result<UntaggedPage, SyncError> {
        Ok(self.store.untagged_plays_page(limit, offset)?)
    }

    pub fn save_mood_tags(
        &self,
        play_id: i64,
        song_mood: i64,
        listener_mood: i64,
    ) -> Result<(), TaggingError> {
        let song = mood_score("song_mood", song_mood)?;
        let listener = mood_score("listener_mood", listener_mood)?;
        if !self.store.save_mood_tags(play_id, song, listener)? {
            return Err(TaggingError::PlayNotFound(play_id));
        }
        info!(
            "Tagged play {} with song mood {} and listener mood {}",
            play_id, song, listener
        );
        Ok(())
    }

    pub fn tagging_progress(&self) -> Result<TaggingProgress, SyncError> {
        Ok(self.store.tagging_progress()?)
    }

    pub async fn auth_status(&self) -> AuthStatus {
        match self.credentials.current().await {
            Some(credential) => AuthStatus {
                logged_in: true,
                fresh: credential.is_fresh(self.settings.refresh_margin),
                expires_at: Some(credential.expires_at_utc()),
                scope: Some(credential.scope),
            },
            None => AuthStatus {
                logged_in: false,
                fresh: false,
                expires_at: None,
                scope: None,
            },
        }
    }

    /// Issues a single-use `state` and the authorization URL carrying it.
    pub fn begin_login(&self) -> LoginRedirect {
        let state = uuid::Uuid::new_v4().to_string();
        let mut pending = self.pending_logins.lock().unwrap();
        pending.retain(|_, issued| issued.elapsed() < LOGIN_STATE_TTL);
        pending.insert(state.clone(), Instant::now());
        LoginRedirect {
            url: self.credentials.authorize_url(&state),
            state,
        }
    }

    pub async fn complete_login(&self, code: &str, state: &str) -> Result<AuthStatus, AuthError> {
        let issued = self.pending_logins.lock().unwrap().remove(state);
        if !issued.is_some_and(|issued| issued.elapsed() < LOGIN_STATE_TTL) {
            warn!("Login callback with unknown or expired state");
            return Err(AuthError::LoginStateMismatch);
        }
        self.credentials.complete_login(code).await?;
        self.engine.forget_listener();
        Ok(self.auth_status().await)
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.credentials.clear().await?;
        self.engine.forget_listener();
        info!("Logged out, credential removed");
        Ok(())
    }

    pub async fn profile(&self) -> Result<PlatformProfile, SyncError> {
        self.platform.fetch_profile().await
    }

    /// Live view of the platform's play history. Nothing is stored.
    pub async fn recent_plays(&self, limit: usize) -> Result<Vec<RecentPlay>, SyncError> {
        self.platform.fetch_recent_plays(limit).await
    }

    pub async fn top_tracks(&self, limit: usize) -> Result<Vec<PlayedTrack>, SyncError> {
        self.platform.fetch_top_tracks(limit).await
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        self.store.table_names()
    }

    pub fn browse_table(&self, name: &str, limit: usize) -> Result<Option<TableRows>, SyncError> {
        Ok(self.store.browse_table(name, limit)?)
    }
}

fn mood_score(field: &'static str, value: i64) -> Result<MoodScore, TaggingError> {
    MoodScore::try_from(value).map_err(|_| TaggingError::MoodOutOfRange { field, value })
}
