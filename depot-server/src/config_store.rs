//! Repository configuration collaborator.
//!
//! The synchronizer and gateway read repository definitions and write the
//! replication checkpoint only through [`ConfigurationStore`].

use crate::config::{Config, RepositoryConfig};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Snapshot of one repository definition, `None` when it is not configured.
    async fn repository(
        &self,
        storage_id: &str,
        repository_id: &str,
    ) -> AppResult<Option<RepositoryConfig>>;

    /// Every repository with change-feed replication configured, with its storage id.
    async fn replicated_repositories(&self) -> AppResult<Vec<(String, RepositoryConfig)>>;

    /// Durably record the replication checkpoint of a repository.
    ///
    /// Returns once the value is persisted; the next read of the repository
    /// observes it.
    async fn save_last_change_id(
        &self,
        storage_id: &str,
        repository_id: &str,
        last_change_id: u64,
    ) -> AppResult<()>;
}

/// Configuration held in memory and mirrored to a JSON file.
///
/// Without a backing path the store is memory-only.
pub struct FileConfigurationStore {
    path: Option<PathBuf>,
    config: RwLock<Config>,
}

impl FileConfigurationStore {
    pub fn new(config: Config, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            config: RwLock::new(config),
        }
    }

    pub fn in_memory(config: Config) -> Self {
        Self {
            path: None,
            config: RwLock::new(config),
        }
    }

    /// Load the file at `path` (defaults when absent) and keep it as backing file.
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let config = Config::load_or_default(&path)?;
        Ok(Self::new(config, path))
    }

    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }
}

#[async_trait]
impl ConfigurationStore for FileConfigurationStore {
    async fn repository(
        &self,
        storage_id: &str,
        repository_id: &str,
    ) -> AppResult<Option<RepositoryConfig>> {
        let config = self.config.read().await;
        Ok(config.repository(storage_id, repository_id).cloned())
    }

    async fn replicated_repositories(&self) -> AppResult<Vec<(String, RepositoryConfig)>> {
        let config = self.config.read().await;
        Ok(config
            .replicated_repositories()
            .map(|(storage_id, repository)| (storage_id.to_string(), repository.clone()))
            .collect())
    }

    async fn save_last_change_id(
        &self,
        storage_id: &str,
        repository_id: &str,
        last_change_id: u64,
    ) -> AppResult<()> {
        // The write lock is held across the file write so persisted checkpoints
        // land in the same order they were applied in memory.
        let mut config = self.config.write().await;
        let replication = config
            .repository_mut(storage_id, repository_id)
            .and_then(|r| r.remote.as_mut())
            .and_then(|remote| remote.replication.as_mut())
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No replication configured for [{storage_id}]/[{repository_id}]"
                ))
            })?;
        replication.last_change_id = last_change_id;

        if let Some(path) = &self.path {
            let json = serde_json::to_vec_pretty(&*config)?;
            crate::storage::save_file(path, json).await?;
        }
        debug!(
            storage = %storage_id,
            repository = %repository_id,
            last_change_id,
            "Saved replication checkpoint"
        );
        Ok(())
    }
}
