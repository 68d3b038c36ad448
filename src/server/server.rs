use anyhow::{Context, Result};
use std::time::Duration;

use tracing::info;

use tower_http::services::ServeDir;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{log_requests, state::*, ServerConfig};
use crate::error::{SyncError, TaggingError};
use crate::platform::TOP_TRACKS_CEILING;
use crate::service::HistoryService;

const DEFAULT_UNTAGGED_PAGE: usize = 20;
const DEFAULT_HISTORY_PAGE: usize = 20;
const DEFAULT_TABLE_PAGE: usize = 100;
const DEFAULT_LIVE_PAGE: usize = 10;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageQuery {
    fn limit(&self, default: usize, config: &ServerConfig) -> usize {
        self.limit
            .unwrap_or(default)
            .clamp(1, config.max_page_size.max(1))
    }
}

#[derive(Deserialize, Debug)]
struct LiveQuery {
    pub limit: Option<usize>,
}

impl LiveQuery {
    /// The platform only serves 1 to 50 items per request.
    fn limit(&self) -> Result<usize, Response> {
        let limit = self.limit.unwrap_or(DEFAULT_LIVE_PAGE);
        if (1..=TOP_TRACKS_CEILING).contains(&limit) {
            Ok(limit)
        } else {
            Err((
                StatusCode::BAD_REQUEST,
                Json(ClientError {
                    error: "invalid_limit",
                    message: format!("Limit must be between 1 and {}", TOP_TRACKS_CEILING),
                }),
            )
                .into_response())
        }
    }
}

#[derive(Serialize)]
struct LiveList<T> {
    count: usize,
    items: Vec<T>,
}

impl<T> From<Vec<T>> for LiveList<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

#[derive(Deserialize, Debug)]
struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MoodTagsBody {
    pub song_mood: i64,
    pub listener_mood: i64,
}

#[derive(Serialize)]
struct ClientError {
    error: &'static str,
    message: String,
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

async fn login(State(service): State<GuardedHistoryService>) -> Redirect {
    let redirect = service.begin_login();
    Redirect::to(&redirect.url)
}

async fn login_callback(
    State(service): State<GuardedHistoryService>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        info!("Authorization was not granted: {}", error);
        return (
            StatusCode::BAD_REQUEST,
            Json(ClientError {
                error: "authorization_denied",
                message: error,
            }),
        )
            .into_response();
    }
    let (Some(code), Some(state)) = (query.code, query.state) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match service.complete_login(&code, &state).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn logout(State(service): State<GuardedHistoryService>) -> Response {
    match service.logout().await {
        Ok(()) => Json(service.auth_status().await).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn auth_status(State(service): State<GuardedHistoryService>) -> impl IntoResponse {
    Json(service.auth_status().await)
}

async fn get_profile(State(service): State<GuardedHistoryService>) -> Result<Response, SyncError> {
    Ok(Json(service.profile().await?).into_response())
}

async fn get_recently_played(
    State(service): State<GuardedHistoryService>,
    Query(query): Query<LiveQuery>,
) -> Response {
    let limit = match query.limit() {
        Ok(limit) => limit,
        Err(response) => return response,
    };
    match service.recent_plays(limit).await {
        Ok(plays) => Json(LiveList::from(plays)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_top_tracks(
    State(service): State<GuardedHistoryService>,
    Query(query): Query<LiveQuery>,
) -> Response {
    let limit = match query.limit() {
        Ok(limit) => limit,
        Err(response) => return response,
    };
    match service.top_tracks(limit).await {
        Ok(tracks) => Json(LiveList::from(tracks)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn run_ingestion(
    State(service): State<GuardedHistoryService>,
) -> Result<Response, SyncError> {
    Ok(Json(service.run_ingestion_cycle().await?).into_response())
}

async fn get_last_ingestion(
    State(service): State<GuardedHistoryService>,
) -> Result<Response, SyncError> {
    Ok(Json(service.get_last_sync()?).into_response())
}

async fn get_ingestion_history(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
) -> Result<Response, SyncError> {
    let limit = page.limit(DEFAULT_HISTORY_PAGE, &state.config);
    Ok(Json(state.service.ingestion_history(limit)?).into_response())
}

async fn get_untagged_plays(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
) -> Result<Response, SyncError> {
    let limit = page.limit(DEFAULT_UNTAGGED_PAGE, &state.config);
    let offset = page.offset.unwrap_or(0);
    Ok(Json(state.service.untagged_plays_page(limit, offset)?).into_response())
}

async fn put_mood_tags(
    State(service): State<GuardedHistoryService>,
    Path(play_id): Path<i64>,
    Json(body): Json<MoodTagsBody>,
) -> Result<StatusCode, TaggingError> {
    service.save_mood_tags(play_id, body.song_mood, body.listener_mood)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_tagging_progress(
    State(service): State<GuardedHistoryService>,
) -> Result<Response, SyncError> {
    Ok(Json(service.tagging_progress()?).into_response())
}

async fn get_table_names(State(service): State<GuardedHistoryService>) -> impl IntoResponse {
    Json(service.table_names())
}

async fn get_table_rows(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Response, SyncError> {
    let limit = page.limit(DEFAULT_TABLE_PAGE, &state.config);
    Ok(match state.service.browse_table(&name, limit)? {
        Some(rows) => Json(rows).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

pub fn make_app(config: ServerConfig, service: Arc<HistoryService>) -> Router {
    let state = ServerState::new(config.clone(), service);

    let auth_routes: Router = Router::new()
        .route("/login", get(login))
        .route("/callback", get(login_callback))
        .route("/logout", post(logout))
        .route("/status", get(auth_status))
        .with_state(state.clone());

    let me_routes: Router = Router::new()
        .route("/profile", get(get_profile))
        .route("/recently-played", get(get_recently_played))
        .route("/top-tracks", get(get_top_tracks))
        .with_state(state.clone());

    let ingestion_routes: Router = Router::new()
        .route("/run", post(run_ingestion))
        .route("/last", get(get_last_ingestion))
        .route("/history", get(get_ingestion_history))
        .with_state(state.clone());

    let plays_routes: Router = Router::new()
        .route("/untagged", get(get_untagged_plays))
        .route("/progress", get(get_tagging_progress))
        .route("/{id}/moods", put(put_mood_tags))
        .with_state(state.clone());

    let tables_routes: Router = Router::new()
        .route("/", get(get_table_names))
        .route("/{name}", get(get_table_rows))
        .with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    home_router
        .nest("/v1/auth", auth_routes)
        .nest("/v1/me", me_routes)
        .nest("/v1/ingestion", ingestion_routes)
        .nest("/v1/plays", plays_routes)
        .nest("/v1/tables", tables_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub async fn run_server(config: ServerConfig, service: Arc<HistoryService>) -> Result<()> {
    let port = config.port;
    let app = make_app(config, service);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
