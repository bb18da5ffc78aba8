//! # Depot Server
//!
//! Indexing and synchronization core of a binary-artifact repository manager.
//! Artifacts live in repositories grouped into storages; this crate indexes
//! their coordinates, replicates remote npm registries into that index, and
//! gives every repository format a uniform filesystem view.
//!
//! ## Key Modules
//!
//! - [`query`]: coordinate predicate trees with bound parameters
//! - [`index`]: list/count/exists/find-one over the artifact store
//! - [`store`]: the persistent store seam and its in-memory implementation
//! - [`layout`]: per-format digest requirements and the layout filesystem
//! - [`replication`]: resumable change-feed replication
//! - [`gateway`]: search/view driven cache warming
//! - [`upstream`]: HTTP client for remote registries
//!
//! ## Usage
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), depot_server::AppError> {
//! use depot_server::{ArtifactIndexService, CoordinateFilter, MemoryArtifactStore, Paging, ScopePair};
//! use std::sync::Arc;
//!
//! let index = ArtifactIndexService::new(Arc::new(MemoryArtifactStore::new()));
//! let scopes = [ScopePair::new("storage0", "npm-group")?];
//! let filter = CoordinateFilter::new().with("name", "Lodash");
//! let hits = index
//!     .list_artifacts(&scopes, &filter, Paging::unbounded(), None, false)
//!     .await?;
//! assert!(hits.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod config_store;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod hash_utils;
pub mod index;
pub mod layout;
pub mod npm;
pub mod query;
pub mod replication;
pub mod storage;
pub mod store;
pub mod types;
pub mod upstream;

pub use config::Config;
pub use config_store::{ConfigurationStore, FileConfigurationStore};
pub use error::{AppError, AppResult, ErrorCode};
pub use feed::{NpmPackageFeedParser, PackageFeedParser};
pub use gateway::{Dispatch, RemoteRepositorySearchEvent, RemoteRequest, RemoteSearchGateway};
pub use index::ArtifactIndexService;
pub use layout::{DigestAlgorithm, LayoutFileSystem, LayoutProvider, LayoutProviderRegistry};
pub use replication::{ChangesFeedSynchronizer, StopReason, SyncReport};
pub use store::{ArtifactStore, MemoryArtifactStore};
pub use types::{ArtifactCoordinates, ArtifactEntry, CoordinateFilter, Paging, ScopePair};
pub use upstream::{RemoteRegistry, UpstreamClient};
