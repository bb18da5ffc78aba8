//! # Configuration Management
//!
//! The depot is configured from a single JSON document:
//!
//! - [`UpstreamSettings`]: timeout and user agent for remote registry calls
//! - [`LoggingSettings`]: tracing output (see the `depot-logging` crate)
//! - [`StorageConfig`]: logical storages, each holding named [`RepositoryConfig`]s
//!
//! A repository with a [`RemoteRepositoryConfig`] proxies a remote registry; when that
//! remote also carries a [`ReplicationConfig`], its change feed is replicated and the
//! `last_change_id` checkpoint is written back into this document.
//!
//! ```rust,no_run
//! # use depot_server::config::Config;
//! let config = Config::load_or_default("depot.json")?;
//! for (storage_id, repository) in config.replicated_repositories() {
//!     println!("{storage_id}/{}", repository.id);
//! }
//! # Ok::<(), depot_server::AppError>(())
//! ```

use crate::error::{AppError, AppResult};
use depot_logging::LoggingSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base directory for repository contents and the index snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Remote registry client settings
    #[serde(default)]
    pub upstream: UpstreamSettings,
    /// Tracing output settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Storages and their repositories
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
}

/// Settings for the HTTP client used against remote registries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Upper bound for a single remote request, body included
    pub timeout_secs: u64,
    pub user_agent: String,
    /// When false every remote fetch fails fast as a transport error
    pub enabled: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("depot/", env!("CARGO_PKG_VERSION")).to_string(),
            enabled: true,
        }
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A logical storage area holding several repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub id: String,
    /// Physical root of this storage; defaults to `<data_dir>/storages/<id>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basedir: Option<PathBuf>,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

/// A named repository inside a storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub id: String,
    /// Layout alias, resolved through the layout provider registry
    pub layout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRepositoryConfig>,
}

/// Remote registry proxied by a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRepositoryConfig {
    /// Base URL used for search and package document requests
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationConfig>,
}

/// Change-feed replication settings and checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Base URL of the replication endpoint exposing `_changes`
    pub replicate_url: String,
    /// Last change sequence applied locally
    #[serde(default)]
    pub last_change_id: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            upstream: UpstreamSettings::default(),
            logging: LoggingSettings::default(),
            storages: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid JSON, or declares
    /// duplicate or blank storage/repository ids.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with fallback to defaults when the file is absent.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject blank or duplicated ids.
    pub fn validate(&self) -> AppResult<()> {
        let mut storages = HashSet::new();
        for storage in &self.storages {
            if storage.id.trim().is_empty() {
                return Err(AppError::BadRequest("Storage id cannot be blank".to_string()));
            }
            if !storages.insert(storage.id.as_str()) {
                return Err(AppError::BadRequest(format!(
                    "Duplicate storage id: {}",
                    storage.id
                )));
            }
            let mut repositories = HashSet::new();
            for repository in &storage.repositories {
                if repository.id.trim().is_empty() {
                    return Err(AppError::BadRequest(format!(
                        "Repository id cannot be blank in storage {}",
                        storage.id
                    )));
                }
                if !repositories.insert(repository.id.as_str()) {
                    return Err(AppError::BadRequest(format!(
                        "Duplicate repository id {} in storage {}",
                        repository.id, storage.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn storage(&self, storage_id: &str) -> Option<&StorageConfig> {
        self.storages.iter().find(|s| s.id == storage_id)
    }

    pub fn repository(&self, storage_id: &str, repository_id: &str) -> Option<&RepositoryConfig> {
        self.storage(storage_id)?
            .repositories
            .iter()
            .find(|r| r.id == repository_id)
    }

    pub fn repository_mut(
        &mut self,
        storage_id: &str,
        repository_id: &str,
    ) -> Option<&mut RepositoryConfig> {
        self.storages
            .iter_mut()
            .find(|s| s.id == storage_id)?
            .repositories
            .iter_mut()
            .find(|r| r.id == repository_id)
    }

    /// Physical root directory of a storage.
    pub fn storage_basedir(&self, storage_id: &str) -> PathBuf {
        self.storage(storage_id)
            .and_then(|s| s.basedir.clone())
            .unwrap_or_else(|| self.data_dir.join("storages").join(storage_id))
    }

    /// Every repository whose remote has replication configured, with its storage id.
    pub fn replicated_repositories(&self) -> impl Iterator<Item = (&str, &RepositoryConfig)> {
        self.storages.iter().flat_map(|storage| {
            storage
                .repositories
                .iter()
                .filter(|r| r.replication().is_some())
                .map(move |r| (storage.id.as_str(), r))
        })
    }
}

impl RepositoryConfig {
    pub fn replication(&self) -> Option<&ReplicationConfig> {
        self.remote.as_ref()?.replication.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        serde_json::from_str(include_str!("../config.json")).unwrap()
    }

    #[test]
    fn test_sample_config_parses() {
        let config = sample();
        config.validate().unwrap();
        let repository = config.repository("storage0", "npm-proxy").unwrap();
        assert_eq!(repository.layout, "npm");
        let replication = repository.replication().unwrap();
        assert_eq!(replication.last_change_id, 0);
        assert!(config.repository("storage0", "missing").is_none());
    }

    #[test]
    fn test_replicated_repositories_skips_plain_remotes() {
        let config = sample();
        let replicated: Vec<_> = config
            .replicated_repositories()
            .map(|(s, r)| format!("{s}/{}", r.id))
            .collect();
        assert_eq!(replicated, vec!["storage0/npm-proxy".to_string()]);
    }

    #[test]
    fn test_storage_basedir_defaults_under_data_dir() {
        let mut config = sample();
        config.data_dir = PathBuf::from("/srv/depot");
        config.storages[0].basedir = None;
        assert_eq!(
            config.storage_basedir("storage0"),
            PathBuf::from("/srv/depot/storages/storage0")
        );
    }

    #[test]
    fn test_duplicate_repository_rejected() {
        let config: Config = serde_json::from_str(
            r#"{"storages":[{"id":"s","repositories":[
                {"id":"r","layout":"raw"},{"id":"r","layout":"npm"}]}]}"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(dir.path().join("missing.json")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.upstream.enabled);
        assert_eq!(config.upstream.timeout(), Duration::from_secs(30));
    }
}
