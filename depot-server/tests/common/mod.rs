//! Shared setup for integration tests: a temp data directory, a file-backed
//! configuration store, the in-memory index and a local mock registry.

#![allow(dead_code)]

use anyhow::Result;
use axum::Router;
use depot_server::config::{
    Config, RemoteRepositoryConfig, ReplicationConfig, RepositoryConfig, StorageConfig,
    UpstreamSettings,
};
use depot_server::{
    ArtifactCoordinates, ArtifactEntry, ArtifactIndexService, FileConfigurationStore,
    MemoryArtifactStore, NpmPackageFeedParser, ScopePair, UpstreamClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const STORAGE: &str = "storage0";
pub const PROXY: &str = "npm-proxy";

pub struct TestSetup {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
    pub config_store: Arc<FileConfigurationStore>,
    pub store: Arc<MemoryArtifactStore>,
    pub index: ArtifactIndexService,
    pub parser: Arc<NpmPackageFeedParser>,
}

/// A running mock registry. The server stops when the handle is dropped.
pub struct MockRegistry {
    pub base_url: String,
    task: JoinHandle<()>,
}

impl Drop for MockRegistry {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve `router` on an ephemeral local port.
pub async fn start_mock_registry(router: Router) -> Result<MockRegistry> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(MockRegistry {
        base_url: format!("http://{addr}"),
        task,
    })
}

/// One storage with a replicated npm proxy pointing at `registry_url`.
pub fn proxy_config(data_dir: PathBuf, registry_url: &str, last_change_id: u64) -> Config {
    Config {
        data_dir,
        upstream: UpstreamSettings {
            timeout_secs: 5,
            ..UpstreamSettings::default()
        },
        storages: vec![StorageConfig {
            id: STORAGE.to_string(),
            basedir: None,
            repositories: vec![
                RepositoryConfig {
                    id: PROXY.to_string(),
                    layout: "npm".to_string(),
                    remote: Some(RemoteRepositoryConfig {
                        url: registry_url.to_string(),
                        replication: Some(ReplicationConfig {
                            replicate_url: registry_url.to_string(),
                            last_change_id,
                        }),
                    }),
                },
                RepositoryConfig {
                    id: "raw-releases".to_string(),
                    layout: "raw".to_string(),
                    remote: None,
                },
            ],
        }],
        ..Config::default()
    }
}

/// Creates a file-backed configuration and an empty index in a temp directory.
pub async fn create_test_setup(registry_url: &str, last_change_id: u64) -> Result<TestSetup> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("depot.json");
    let config = proxy_config(temp_dir.path().join("data"), registry_url, last_change_id);
    let config_store = Arc::new(FileConfigurationStore::new(config, &config_path));

    let store = Arc::new(MemoryArtifactStore::open(temp_dir.path().join("data/index.json")).await?);
    let index = ArtifactIndexService::new(store.clone());
    let parser = Arc::new(NpmPackageFeedParser::new(index.clone()));

    Ok(TestSetup {
        temp_dir,
        config_path,
        config_store,
        store,
        index,
        parser,
    })
}

pub fn upstream_client() -> Arc<UpstreamClient> {
    let settings = UpstreamSettings {
        timeout_secs: 5,
        ..UpstreamSettings::default()
    };
    Arc::new(UpstreamClient::new(&settings).unwrap())
}

/// Index one npm version directly.
pub async fn seed_npm(index: &ArtifactIndexService, repository: &str, name: &str, version: &str) {
    let scope = ScopePair::new(STORAGE, repository).unwrap();
    let base = name.rsplit('/').next().unwrap_or(name);
    let coordinates = ArtifactCoordinates::new()
        .with("name", name)
        .with("version", version)
        .with("extension", "tgz");
    index
        .save(ArtifactEntry::new(
            &scope,
            format!("{name}/-/{base}-{version}.tgz"),
            coordinates,
        ))
        .await
        .unwrap();
}
