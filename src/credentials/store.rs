use super::accounts_client::TokenExchanger;
use super::models::Credential;
use super::token_file::TokenFile;
use crate::error::AuthError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Owner of the access credential.
///
/// Every read and refresh goes through one async mutex, so concurrent callers
/// that find the credential stale wait for a single refresh and then observe
/// its result. The credential file is re-read under the same lock before
/// refreshing, which picks up a rotation performed by another process.
pub struct CredentialStore {
    file: TokenFile,
    exchanger: Arc<dyn TokenExchanger>,
    current: Mutex<Option<Credential>>,
}

impl CredentialStore {
    /// Opens the store, loading whatever credential is on disk.
    pub fn open(file: TokenFile, exchanger: Arc<dyn TokenExchanger>) -> Result<Self, AuthError> {
        let current = file.load()?;
        match &current {
            Some(c) => info!(
                "Loaded credential from {:?}, expires at {}",
                file.path(),
                c.expires_at_utc()
            ),
            None => info!("No credential at {:?}, login required", file.path()),
        }
        Ok(Self {
            file,
            exchanger,
            current: Mutex::new(current),
        })
    }

    /// Reloads the credential from disk, replacing the in-memory copy.
    pub async fn load(&self) -> Result<Option<Credential>, AuthError> {
        let mut current = self.current.lock().await;
        *current = self.file.load()?;
        Ok(current.clone())
    }

    pub async fn current(&self) -> Option<Credential> {
        self.current.lock().await.clone()
    }

    pub async fn is_valid(&self, margin: Duration) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.is_fresh(margin))
    }

    /// Returns a credential that stays fresh for at least `margin`,
    /// refreshing it first if needed.
    pub async fn ensure_valid(&self, margin: Duration) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref().filter(|c| c.is_fresh(margin)) {
            return Ok(credential.clone());
        }

        if let Some(on_disk) = self.file.load()? {
            if on_disk.is_fresh(margin) {
                info!("Picked up a fresh credential written by another process");
                *current = Some(on_disk.clone());
                return Ok(on_disk);
            }
            *current = Some(on_disk);
        }

        let stale = current.clone().ok_or(AuthError::NoCredential)?;
        let refreshed = self.refresh_from(&stale).await?;
        *current = Some(refreshed.clone());
        if !refreshed.is_fresh(margin) {
            warn!(
                "Refreshed credential expires at {}, inside the {}s refresh margin",
                refreshed.expires_at_utc(),
                margin.as_secs()
            );
            return Err(AuthError::ExchangeFailed(format!(
                "refreshed credential expires inside the {}s refresh margin",
                margin.as_secs()
            )));
        }
        Ok(refreshed)
    }

    /// Unconditionally exchanges the refresh token for a new access token.
    pub async fn refresh(&self) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        let stale = current.clone().ok_or(AuthError::NoCredential)?;
        let refreshed = self.refresh_from(&stale).await?;
        *current = Some(refreshed.clone());
        Ok(refreshed)
    }

    /// Handles an access token the platform answered with 401.
    ///
    /// Refreshes only when the stored token is still the rejected one; if a
    /// concurrent caller already rotated it, the rotated credential is returned.
    pub async fn refresh_rejected(&self, rejected_access_token: &str) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        let stored = current.clone().ok_or(AuthError::NoCredential)?;
        if stored.access_token != rejected_access_token {
            return Ok(stored);
        }
        let refreshed = self.refresh_from(&stored).await?;
        *current = Some(refreshed.clone());
        Ok(refreshed)
    }

    pub fn authorize_url(&self, state: &str) -> String {
        self.exchanger.authorize_url(state)
    }

    /// Finishes the authorization-code flow and stores the resulting credential.
    pub async fn complete_login(&self, code: &str) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        let response = self.exchanger.exchange_code(code).await?;
        let credential = Credential::from_token_response(response, None, Utc::now())?;
        self.file.save(&credential)?;
        info!("Login completed, credential expires at {}", credential.expires_at_utc());
        *current = Some(credential.clone());
        Ok(credential)
    }

    /// Forgets the credential in memory and on disk.
    pub async fn clear(&self) -> Result<(), AuthError> {
        let mut current = self.current.lock().await;
        self.file.clear()?;
        *current = None;
        Ok(())
    }

    async fn refresh_from(&self, stale: &Credential) -> Result<Credential, AuthError> {
        let response = self.exchanger.refresh(&stale.refresh_token).await?;
        let refreshed = Credential::from_token_response(response, Some(stale), Utc::now())?;
        self.file.save(&refreshed)?;
        info!(
            "Access token refreshed, new expiry {}",
            refreshed.expires_at_utc()
        );
        Ok(refreshed)
    }
}
