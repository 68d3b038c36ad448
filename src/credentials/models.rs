use crate::error::AuthError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Access/refresh token pair as persisted in the credential file.
///
/// `expires_at` is a unix timestamp in seconds. The issue time is not stored
/// separately; it is `expires_at - expires_in`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
    pub expires_at: i64,
}

impl Credential {
    pub fn issued_at(&self) -> i64 {
        self.expires_at - self.expires_in
    }

    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.expires_at, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Fresh means `now < expires_at - margin`; the boundary itself is stale.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now.timestamp() < self.expires_at - margin.as_secs() as i64
    }

    pub fn is_fresh(&self, margin: Duration) -> bool {
        self.is_fresh_at(Utc::now(), margin)
    }

    /// Builds the credential that results from a token endpoint response.
    ///
    /// The platform may omit the refresh token or the scope on refresh, in
    /// which case the values of `previous` are carried over.
    pub fn from_token_response(
        response: TokenResponse,
        previous: Option<&Credential>,
        now: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .ok_or_else(|| {
                AuthError::ExchangeFailed("token response carried no refresh token".to_string())
            })?;
        let scope = response
            .scope
            .or_else(|| previous.map(|p| p.scope.clone()))
            .unwrap_or_default();

        Ok(Self {
            access_token: response.access_token,
            refresh_token,
            token_type: response.token_type.unwrap_or_else(default_token_type),
            expires_in: response.expires_in,
            scope,
            expires_at: now.timestamp() + response.expires_in,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Body returned by the accounts token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth client registration used against the accounts endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}
