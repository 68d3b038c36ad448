//! Client for the platform's accounts (token) endpoint.

use super::models::{ClientCredentials, TokenResponse};
use crate::error::AuthError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Scopes requested during login. Reading history and the profile is all the
/// ingestion core needs.
pub const LOGIN_SCOPES: &str = "user-read-recently-played user-read-private user-read-email";

/// Seam between the credential store and the accounts endpoint.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// URL the user visits to grant access. `state` is echoed back on callback.
    fn authorize_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}

pub struct AccountsClient {
    client: reqwest::Client,
    base_url: String,
    credentials: ClientCredentials,
}

impl AccountsClient {
    pub fn new(base_url: &str, credentials: ClientCredentials, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create accounts HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let url = format!("{}/api/token", self.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            warn!("Accounts endpoint rejected token request ({}): {}", status, body);
            return Err(AuthError::ReauthenticationRequired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::ExchangeFailed(format!(
                "accounts endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("unparsable token response: {}", e)))
    }
}

#[async_trait]
impl TokenExchanger for AccountsClient {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}&show_dialog=true",
            self.base_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.credentials.redirect_uri),
            urlencoding::encode(LOGIN_SCOPES),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AuthError> {
        debug!("Exchanging authorization code for tokens");
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.credentials.redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        debug!("Refreshing access token");
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
