mod file_config;

pub use file_config::{FileConfig, IngestionConfig, PlatformConfig};

use crate::credentials::ClientCredentials;
use crate::error::AuthError;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const CLIENT_ID_VAR: &str = "SPOTIFY_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "SPOTIFY_CLIENT_SECRET";
pub const REDIRECT_URI_VAR: &str = "SPOTIFY_REDIRECT_URI";

pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com";
pub const DEFAULT_ACCOUNTS_BASE_URL: &str = "https://accounts.spotify.com";

/// Largest id list the audio-features endpoint accepts in one call.
pub const MAX_FEATURES_BATCH_SIZE: usize = 100;

/// CLI arguments that can be used for config resolution.
/// The client registration values are filled from the environment by clap.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub credential_file: Option<PathBuf>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub credential_file: PathBuf,
    pub platform: PlatformSettings,
    pub ingestion: IngestionSettings,
}

#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub client: ClientCredentials,
    pub api_base_url: String,
    pub accounts_base_url: String,
    pub request_timeout_sec: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub features_batch_size: usize,
}

impl PlatformSettings {
    pub fn with_client(client: ClientCredentials) -> Self {
        Self {
            client,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            accounts_base_url: DEFAULT_ACCOUNTS_BASE_URL.to_string(),
            request_timeout_sec: 30,
            max_retries: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            features_batch_size: MAX_FEATURES_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub refresh_margin: Duration,
    pub recent_plays_limit: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(60),
            recent_plays_limit: 50,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let platform_file = file.platform.unwrap_or_default();
        let ingestion_file = file.ingestion.unwrap_or_default();

        // Client registration is checked first so a misconfigured deployment
        // fails before anything touches the disk or the network.
        let client = ClientCredentials {
            client_id: required(platform_file.client_id, &cli.client_id, CLIENT_ID_VAR)?,
            client_secret: required(
                platform_file.client_secret,
                &cli.client_secret,
                CLIENT_SECRET_VAR,
            )?,
            redirect_uri: required(
                platform_file.redirect_uri,
                &cli.redirect_uri,
                REDIRECT_URI_VAR,
            )?,
        };

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());
        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());
        let credential_file = file
            .credential_file
            .map(PathBuf::from)
            .or_else(|| cli.credential_file.clone())
            .unwrap_or_else(|| db_dir.join("tokens.json"));

        let defaults = PlatformSettings::with_client(client.clone());
        let platform = PlatformSettings {
            client,
            api_base_url: platform_file
                .api_base_url
                .unwrap_or(defaults.api_base_url),
            accounts_base_url: platform_file
                .accounts_base_url
                .unwrap_or(defaults.accounts_base_url),
            request_timeout_sec: platform_file
                .request_timeout_sec
                .unwrap_or(defaults.request_timeout_sec),
            max_retries: platform_file.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff_ms: platform_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: platform_file
                .max_backoff_ms
                .unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: platform_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            features_batch_size: platform_file
                .features_batch_size
                .unwrap_or(defaults.features_batch_size),
        };

        if platform.features_batch_size == 0
            || platform.features_batch_size > MAX_FEATURES_BATCH_SIZE
        {
            bail!(
                "features_batch_size must be between 1 and {}, got {}",
                MAX_FEATURES_BATCH_SIZE,
                platform.features_batch_size
            );
        }
        if platform.backoff_multiplier < 1.0 {
            bail!(
                "backoff_multiplier must be at least 1.0, got {}",
                platform.backoff_multiplier
            );
        }

        let ingestion_defaults = IngestionSettings::default();
        let ingestion = IngestionSettings {
            refresh_margin: ingestion_file
                .refresh_margin_sec
                .map(Duration::from_secs)
                .unwrap_or(ingestion_defaults.refresh_margin),
            recent_plays_limit: ingestion_file
                .recent_plays_limit
                .unwrap_or(ingestion_defaults.recent_plays_limit),
        };
        if ingestion.recent_plays_limit == 0 {
            bail!("recent_plays_limit must be at least 1");
        }

        Ok(Self {
            db_dir,
            port,
            logging_level,
            frontend_dir_path,
            credential_file,
            platform,
            ingestion,
        })
    }

    pub fn listening_db_path(&self) -> PathBuf {
        self.db_dir.join("listening.db")
    }
}

fn required(
    from_file: Option<String>,
    from_cli: &Option<String>,
    name: &'static str,
) -> Result<String> {
    from_file
        .or_else(|| from_cli.clone())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AuthError::MissingConfiguration(name).into())
}

/// Parses a logging level string into RequestsLoggingLevel.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
