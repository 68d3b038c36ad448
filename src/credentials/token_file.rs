use super::models::Credential;
use crate::error::AuthError;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// JSON credential file shared by every process that talks to the platform.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so readers observe either the old or the new credential.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Credential>, AuthError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No credential file at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => {
                return Err(AuthError::CorruptCredentialFile {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| AuthError::CorruptCredentialFile {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    pub fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(persist_error)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(persist_error)?;
        let json = serde_json::to_vec_pretty(credential)
            .map_err(|e| AuthError::Persist(e.to_string()))?;
        tmp.write_all(&json).map_err(persist_error)?;
        tmp.as_file().sync_all().map_err(persist_error)?;
        tmp.persist(&self.path)
            .map_err(|e| AuthError::Persist(e.error.to_string()))?;

        debug!("Credential written to {:?}", self.path);
        Ok(())
    }

    /// Removes the file. Returns whether a credential was actually present.
    pub fn clear(&self) -> Result<bool, AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Credential file {:?} removed", self.path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(persist_error(e)),
        }
    }
}

fn persist_error(e: std::io::Error) -> AuthError {
    AuthError::Persist(e.to_string())
}
