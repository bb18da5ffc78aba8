//! Reconciliation of remote npm documents into the artifact index.
//!
//! Applying the same document twice leaves one entry per version; the second
//! pass only refreshes `remote.last_seen` and the dist fields. The
//! synchronizer and the search gateway rely on this and do no deduplication of
//! their own.

use crate::error::{AppError, AppResult};
use crate::index::ArtifactIndexService;
use crate::layout::{LayoutProvider, NpmLayoutProvider};
use crate::npm::{Dist, PackageFeed, SearchResults};
use crate::types::{ArtifactCoordinates, ArtifactEntry, RemoteArtifactMetadata, ScopePair};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

/// Feed-application collaborator: turns remote documents into index entries.
#[async_trait]
pub trait PackageFeedParser: Send + Sync {
    /// Reconcile every version of a package document. Returns the number of
    /// entries created.
    async fn parse_feed(&self, scope: &ScopePair, feed: &PackageFeed) -> AppResult<usize>;

    /// Reconcile the package/version pairs of a search response.
    async fn parse_search_result(
        &self,
        scope: &ScopePair,
        results: &SearchResults,
    ) -> AppResult<usize>;

    /// Make everything applied so far durable. Called before a replication
    /// checkpoint moves past the applied changes.
    async fn flush(&self) -> AppResult<()>;
}

#[derive(Clone)]
pub struct NpmPackageFeedParser {
    index: ArtifactIndexService,
}

impl NpmPackageFeedParser {
    pub fn new(index: ArtifactIndexService) -> Self {
        Self { index }
    }

    /// Insert or refresh the entry for one package version.
    ///
    /// Returns whether a new entry was created.
    async fn reconcile(
        &self,
        scope: &ScopePair,
        name: &str,
        version: &str,
        dist: Option<&Dist>,
    ) -> AppResult<bool> {
        let coordinates = ArtifactCoordinates::new()
            .with(NpmLayoutProvider::NAME, name)
            .with(NpmLayoutProvider::VERSION, version)
            .with(NpmLayoutProvider::EXTENSION, "tgz");
        let path = NpmLayoutProvider.artifact_path(&coordinates)?;

        let existing = self
            .index
            .find_one(scope.storage_id(), scope.repository_id(), &path)
            .await?;

        let now = Utc::now();
        let cached = existing
            .as_ref()
            .and_then(|e| e.remote.as_ref())
            .is_some_and(|r| r.cached);
        // Search hits carry no dist block; keep what an earlier document told us.
        let previous = existing.as_ref().and_then(|e| e.remote.as_ref());
        let remote = RemoteArtifactMetadata {
            last_seen: now,
            cached,
            tarball: dist
                .and_then(|d| d.tarball.clone())
                .or_else(|| previous.and_then(|r| r.tarball.clone())),
            shasum: dist
                .and_then(|d| d.shasum.clone())
                .or_else(|| previous.and_then(|r| r.shasum.clone())),
            integrity: dist
                .and_then(|d| d.integrity.clone())
                .or_else(|| previous.and_then(|r| r.integrity.clone())),
        };

        let (entry, created) = match existing {
            Some(mut entry) => {
                entry.remote = Some(remote);
                entry.last_updated = now;
                (entry, false)
            }
            None => {
                let mut entry = ArtifactEntry::new(scope, path, coordinates);
                entry.remote = Some(remote);
                (entry, true)
            }
        };

        match self.index.save(entry).await {
            Ok(_) => Ok(created),
            // Another writer indexed or refreshed the same path first.
            Err(AppError::Conflict(reason)) => {
                debug!(scope = %scope, package = %name, version = %version, %reason, "Concurrent update, keeping stored entry");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PackageFeedParser for NpmPackageFeedParser {
    async fn parse_feed(&self, scope: &ScopePair, feed: &PackageFeed) -> AppResult<usize> {
        let name = feed
            .package_name()
            .ok_or_else(|| AppError::BadRequest("Package document has no name".to_string()))?;

        let mut created = 0;
        for (key, version) in &feed.versions {
            let number = if version.version.is_empty() {
                key.as_str()
            } else {
                version.version.as_str()
            };
            if self
                .reconcile(scope, name, number, version.dist.as_ref())
                .await?
            {
                created += 1;
            }
        }
        debug!(
            scope = %scope,
            package = %name,
            versions = feed.versions.len(),
            created,
            "Applied package document"
        );
        Ok(created)
    }

    async fn parse_search_result(
        &self,
        scope: &ScopePair,
        results: &SearchResults,
    ) -> AppResult<usize> {
        let mut created = 0;
        for hit in &results.objects {
            if self
                .reconcile(scope, &hit.package.name, &hit.package.version, None)
                .await?
            {
                created += 1;
            }
        }
        info!(scope = %scope, hits = results.objects.len(), created, "Applied search results");
        Ok(created)
    }
    async fn flush(&self) -> AppResult<()> {
        self.index.flush().await
    }
}
