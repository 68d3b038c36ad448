use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use moodsync_server::config::{
    AppConfig, CliConfig, FileConfig, CLIENT_ID_VAR, CLIENT_SECRET_VAR, REDIRECT_URI_VAR,
};
use moodsync_server::server::{run_server, RequestsLoggingLevel, ServerConfig};
use moodsync_server::HistoryService;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI ones.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the listening database and, by default, the credential file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Credential file location, defaults to `<db-dir>/tokens.json`.
    #[clap(long, value_parser = parse_path)]
    pub credential_file: Option<PathBuf>,

    #[clap(long, env = CLIENT_ID_VAR)]
    pub client_id: Option<String>,

    #[clap(long, env = CLIENT_SECRET_VAR, hide_env_values = true)]
    pub client_secret: Option<String>,

    #[clap(long, env = REDIRECT_URI_VAR)]
    pub redirect_uri: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serves the HTTP API (default).
    Serve,

    /// Runs a single ingestion cycle and prints its counts.
    Sync,

    /// Prints the last sync, tagging progress and credential state.
    Status,

    /// Authorizes access interactively: open the printed URL, then paste
    /// the URL the browser was redirected to.
    Login,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            port: self.port,
            logging_level: self.logging_level.clone(),
            frontend_dir_path: self.frontend_dir_path.clone(),
            credential_file: self.credential_file.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
        }
    }
}

/// Pulls `code` and `state` out of a pasted redirect URL.
fn parse_redirect(pasted: &str) -> Result<(String, String)> {
    let url = reqwest::Url::parse(pasted.trim()).context("Not a valid URL")?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };
    if let Some(error) = param("error") {
        anyhow::bail!("Authorization was not granted: {}", error);
    }
    let code = param("code").context("Redirect URL has no code parameter")?;
    let state = param("state").context("Redirect URL has no state parameter")?;
    Ok((code, state))
}

async fn login(service: &HistoryService) -> Result<()> {
    let redirect = service.begin_login();
    println!("Open this URL in a browser and authorize access:\n\n{}\n", redirect.url);
    print!("Paste the URL you were redirected to: ");
    std::io::stdout().flush()?;

    let mut pasted = String::new();
    std::io::stdin().read_line(&mut pasted)?;
    let (code, state) = parse_redirect(&pasted)?;

    let status = service.complete_login(&code, &state).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn print_status(service: &HistoryService) -> Result<()> {
    let status = service.auth_status().await;
    println!("Logged in: {}", status.logged_in);
    if let Some(expires_at) = status.expires_at {
        println!("Credential expires at: {} (fresh: {})", expires_at, status.fresh);
    }
    match service.get_last_sync()? {
        Some(record) => println!(
            "Last sync: {} ({} plays, {} tracks, {} duplicates)",
            record.completed_at,
            record.plays_inserted,
            record.tracks_inserted,
            record.duplicates_skipped
        ),
        None => println!("Last sync: never"),
    }
    let progress = service.tagging_progress()?;
    println!(
        "Tagged plays: {}/{} ({} left)",
        progress.tagged_plays,
        progress.total_plays,
        progress.untagged_plays()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!(
        "Opening listening database at {:?}...",
        config.listening_db_path()
    );
    let service = Arc::new(HistoryService::from_config(&config)?);

    match cli_args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let server_config = ServerConfig {
                requests_logging_level: config.logging_level.clone(),
                port: config.port,
                frontend_dir_path: config.frontend_dir_path.clone(),
                ..Default::default()
            };
            info!("Ready to serve at port {}!", config.port);
            run_server(server_config, service).await
        }
        Command::Sync => {
            let report = service.run_ingestion_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Status => print_status(&service).await,
        Command::Login => login(&service).await,
    }
}
