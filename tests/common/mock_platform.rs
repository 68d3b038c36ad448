//! In-process stand-in for the platform's Web API and accounts service.
//!
//! Serves the token, profile, play history and audio-features endpoints on a
//! random local port. Tests script failures per endpoint and inspect what
//! the client actually sent.

use super::constants::*;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const TOKEN_ROUTE: &str = "/api/token";
pub const PROFILE_ROUTE: &str = "/v1/me";
pub const RECENTLY_PLAYED_ROUTE: &str = "/v1/me/player/recently-played";
pub const AUDIO_FEATURES_ROUTE: &str = "/v1/audio-features";
pub const TOP_TRACKS_ROUTE: &str = "/v1/me/top/tracks";

/// A canned failure returned instead of the normal answer.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Status(u16),
    RateLimited { retry_after_secs: Option<u64> },
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub query: HashMap<String, String>,
    pub bearer: Option<String>,
}

#[derive(Default)]
struct MockState {
    plays: Vec<Value>,
    tracks_without_features: HashSet<String>,
    scripted: HashMap<&'static str, VecDeque<ScriptedResponse>>,
    valid_tokens: HashSet<String>,
    requests: Vec<RecordedRequest>,
    refresh_count: usize,
    refresh_revoked: bool,
    history_delay: Duration,
}

type SharedState = Arc<Mutex<MockState>>;

pub struct MockPlatform {
    pub base_url: String,
    state: SharedState,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockPlatform {
    pub async fn spawn() -> Self {
        let state: SharedState = Arc::new(Mutex::new(MockState::default()));
        state
            .lock()
            .unwrap()
            .valid_tokens
            .insert(INITIAL_ACCESS_TOKEN.to_string());

        let app = Router::new()
            .route(TOKEN_ROUTE, post(token))
            .route(PROFILE_ROUTE, get(profile))
            .route(RECENTLY_PLAYED_ROUTE, get(recently_played))
            .route(AUDIO_FEATURES_ROUTE, get(audio_features))
        .route(TOP_TRACKS_ROUTE, get(top_tracks))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Mock platform failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Replaces the play history. Items are wire-format play history objects.
    pub fn set_plays(&self, plays: Vec<Value>) {
        self.state.lock().unwrap().plays = plays;
    }

    pub fn withhold_features_for(&self, track_id: &str) {
        self.state
            .lock()
            .unwrap()
            .tracks_without_features
            .insert(track_id.to_string());
    }

    /// Queues responses returned, in order, before `route` behaves normally.
    pub fn script(&self, route: &'static str, responses: Vec<ScriptedResponse>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(route)
            .or_default()
            .extend(responses);
    }

    /// Makes every access token issued so far answer 401.
    pub fn expire_access_tokens(&self) {
        self.state.lock().unwrap().valid_tokens.clear();
    }

    /// Makes the refresh grant fail as if the user revoked access.
    pub fn revoke_refresh_token(&self) {
        self.state.lock().unwrap().refresh_revoked = true;
    }

    pub fn delay_history(&self, delay: Duration) {
        self.state.lock().unwrap().history_delay = delay;
    }

    pub fn refresh_count(&self) -> usize {
        self.state.lock().unwrap().refresh_count
    }

    pub fn requests_to(&self, route: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.path == route)
            .cloned()
            .collect()
    }
}

fn scripted_response(response: ScriptedResponse) -> Response {
    match response {
        ScriptedResponse::Status(code) => {
            let status = StatusCode::from_u16(code).expect("Invalid scripted status");
            (status, Json(json!({"error": {"status": code, "message": "scripted"}}))).into_response()
        }
        ScriptedResponse::RateLimited { retry_after_secs } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": {"status": 429, "message": "API rate limit exceeded"}})),
            )
                .into_response();
            if let Some(secs) = retry_after_secs {
                response
                    .headers_mut()
                    .insert("retry-after", secs.to_string().parse().unwrap());
            }
            response
        }
    }
}

/// Records the request, then answers with a scripted failure or a 401 when
/// the bearer token is not one the mock issued. `None` means proceed.
fn gate(
    state: &SharedState,
    route: &'static str,
    uri: &Uri,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Option<Response> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        path: uri.path().to_string(),
        query: query.clone(),
        bearer: bearer.clone(),
    });

    if let Some(response) = state.scripted.get_mut(route).and_then(VecDeque::pop_front) {
        return Some(scripted_response(response));
    }

    let authorized = bearer.is_some_and(|token| state.valid_tokens.contains(&token));
    if !authorized {
        return Some(
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"status": 401, "message": "The access token expired"}})),
            )
                .into_response(),
        );
    }
    None
}

async fn token(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let basic = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Basic "));

    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        path: uri.path().to_string(),
        query: form.clone(),
        bearer: None,
    });
    if let Some(response) = state.scripted.get_mut(TOKEN_ROUTE).and_then(VecDeque::pop_front) {
        return scripted_response(response);
    }
    if !basic {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_client"}))).into_response();
    }

    match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") => {
            if state.refresh_revoked {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant", "error_description": "Refresh token revoked"})),
                )
                    .into_response();
            }
            state.refresh_count += 1;
            let access_token = format!("{}{}", REFRESHED_ACCESS_PREFIX, state.refresh_count);
            state.valid_tokens.insert(access_token.clone());
            Json(json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "user-read-recently-played"
            }))
            .into_response()
        }
        Some("authorization_code") => {
            let code = form.get("code").cloned().unwrap_or_default();
            let access_token = format!("{}code-{}", REFRESHED_ACCESS_PREFIX, code);
            state.valid_tokens.insert(access_token.clone());
            Json(json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "mock-refresh-token",
                "scope": "user-read-recently-played user-read-private"
            }))
            .into_response()
        }
        _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "unsupported_grant_type"})))
            .into_response(),
    }
}

async fn profile(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(response) = gate(&state, PROFILE_ROUTE, &uri, &headers, &query) {
        return response;
    }
    Json(json!({
        "id": LISTENER_ID,
        "display_name": LISTENER_NAME,
        "email": "listener@example.com",
        "country": "IT"
    }))
    .into_response()
}

async fn recently_played(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(response) = gate(&state, RECENTLY_PLAYED_ROUTE, &uri, &headers, &query) {
        return response;
    }
    let limit: usize = query
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(20);

    let (items, delay) = {
        let state = state.lock().unwrap();
        let items: Vec<Value> = state.plays.iter().take(limit).cloned().collect();
        (items, state.history_delay)
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Json(json!({"items": items, "next": null, "limit": limit})).into_response()
}

/// Distinct tracks of the play history, most recently played first.
async fn top_tracks(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(response) = gate(&state, TOP_TRACKS_ROUTE, &uri, &headers, &query) {
        return response;
    }
    let limit: usize = query
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(20);

    let state = state.lock().unwrap();
    let mut seen = HashSet::new();
    let items: Vec<Value> = state
        .plays
        .iter()
        .map(|play| play["track"].clone())
        .filter(|track| seen.insert(track["id"].to_string()))
        .take(limit)
        .collect();
    Json(json!({"items": items, "limit": limit})).into_response()
}

async fn audio_features(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(response) = gate(&state, AUDIO_FEATURES_ROUTE, &uri, &headers, &query) {
        return response;
    }
    let state = state.lock().unwrap();
    let features: Vec<Value> = query
        .get("ids")
        .map(|ids| ids.split(',').collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .map(|id| {
            if state.tracks_without_features.contains(id) {
                Value::Null
            } else {
                json!({
                    "id": id,
                    "energy": 0.7,
                    "danceability": 0.6,
                    "valence": 0.5,
                    "tempo": 120.0,
                    "key": 5
                })
            }
        })
        .collect();
    Json(json!({"audio_features": features})).into_response()
}
