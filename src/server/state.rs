use axum::extract::FromRef;

use crate::service::HistoryService;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedHistoryService = Arc<HistoryService>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub service: GuardedHistoryService,
}

impl ServerState {
    pub fn new(config: ServerConfig, service: GuardedHistoryService) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            hash: env!("GIT_HASH").to_owned(),
            service,
        }
    }
}

impl FromRef<ServerState> for GuardedHistoryService {
    fn from_ref(input: &ServerState) -> Self {
        input.service.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
