//! Persisted session credentials
//!
//! The credential material belongs to the protocol client and is opaque here;
//! the bot only needs to know whether it exists and to wipe it when the
//! session is no longer valid.

use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Storage for protocol client credentials
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Location of the credential material
    fn path(&self) -> &Path;

    /// Whether credentials are present
    async fn exists(&self) -> bool;

    /// Delete all credential material. Missing credentials are not an error.
    async fn clear(&self) -> Result<()>;
}

/// Session stored as a directory of files
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    directory: PathBuf,
}

impl FileSessionStore {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn path(&self) -> &Path {
        &self.directory
    }

    async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.directory).await.unwrap_or(false)
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.directory).await {
            Ok(()) => {
                info!("Session credentials cleared at {:?}", self.directory);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Session(format!(
                "Failed to clear session at {:?}: {}",
                self.directory, e
            ))),
        }
    }
}
