//! Error taxonomy shared by the credential, platform and ingestion layers.
//!
//! Storage internals work with `anyhow::Result` and are folded into
//! [`SyncError::Database`] or [`TaggingError::Database`] at the service
//! boundary. A play that is already stored is not an error; the ingestion
//! engine reports it as a skipped duplicate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing required configuration value {0}")]
    MissingConfiguration(&'static str),

    #[error("No credential stored, login required")]
    NoCredential,

    #[error("Credential file {path} is corrupt: {reason}")]
    CorruptCredentialFile { path: String, reason: String },

    #[error("Refresh token was rejected, re-authentication required")]
    ReauthenticationRequired,

    #[error("Access token rejected by the platform even after a refresh")]
    Rejected,

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Failed to persist credential: {0}")]
    Persist(String),

    #[error("Unknown or expired login state")]
    LoginStateMismatch,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingConfiguration(_) => "missing_configuration",
            AuthError::NoCredential => "no_credential",
            AuthError::CorruptCredentialFile { .. } => "corrupt_credential_file",
            AuthError::ReauthenticationRequired => "reauthentication_required",
            AuthError::Rejected => "credential_rejected",
            AuthError::ExchangeFailed(_) => "token_exchange_failed",
            AuthError::Persist(_) => "credential_persist_failed",
            AuthError::LoginStateMismatch => "login_state_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Rate limited by the platform after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Network error: {message}")]
    Network {
        status: Option<u16>,
        message: String,
    },

    #[error("Unexpected response from the platform: {0}")]
    InvalidResponse(String),

    #[error("Database error: {0:#}")]
    Database(#[from] anyhow::Error),

    #[error("An ingestion cycle is already in progress")]
    CycleInProgress,
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(e) => e.kind(),
            SyncError::RateLimited { .. } => "rate_limited",
            SyncError::Network { .. } => "network",
            SyncError::InvalidResponse(_) => "invalid_response",
            SyncError::Database(_) => "database",
            SyncError::CycleInProgress => "cycle_in_progress",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

#[derive(Debug, Error)]
pub enum TaggingError {
    #[error("{field} must be between 1 and 5, got {value}")]
    MoodOutOfRange { field: &'static str, value: i64 },

    #[error("Play {0} not found")]
    PlayNotFound(i64),

    #[error("Database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

impl TaggingError {
    pub fn kind(&self) -> &'static str {
        match self {
            TaggingError::MoodOutOfRange { .. } => "mood_out_of_range",
            TaggingError::PlayNotFound(_) => "play_not_found",
            TaggingError::Database(_) => "database",
        }
    }
}
