//! # Artifact Index Service
//!
//! Read side of the artifact metadata: coordinate search across arbitrary scope
//! sets, plus the hot-path `exists`/`find_one` lookups used on every artifact
//! access. Store failures are propagated unchanged.

use crate::error::{AppError, AppResult};
use crate::query::{self, Projection, IDENTITY_ORDER};
use crate::store::ArtifactStore;
use crate::types::{ArtifactCoordinates, ArtifactEntry, CoordinateFilter, Paging, ScopePair};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ArtifactIndexService {
    store: Arc<dyn ArtifactStore>,
}

fn require_scopes(scopes: &[ScopePair]) -> AppResult<()> {
    if scopes.is_empty() {
        return Err(AppError::InvalidScope(
            "At least one (storageId, repositoryId) pair is required".to_string(),
        ));
    }
    Ok(())
}

impl ArtifactIndexService {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// List entries in `scopes` whose coordinates match `filter`.
    ///
    /// With `strict` each filtered coordinate must equal the value ignoring case;
    /// otherwise it must contain it ignoring case.
    ///
    /// # Errors
    ///
    /// `InvalidScope` for an empty scope set, `InvalidFilter` for an illegal field
    /// or order-by name, and any store failure.
    pub async fn list_artifacts(
        &self,
        scopes: &[ScopePair],
        filter: &CoordinateFilter,
        paging: Paging,
        order_by: Option<&str>,
        strict: bool,
    ) -> AppResult<Vec<ArtifactEntry>> {
        require_scopes(scopes)?;
        let prepared = query::prepare_parameters(filter, strict)?;
        let query = query::build_coordinates_query(scopes, &prepared, paging, order_by, strict)?;
        let entries = self.store.execute(&query).await?;
        debug!(matched = entries.len(), "Listed artifacts");
        Ok(entries)
    }

    /// Number of entries [`list_artifacts`](Self::list_artifacts) would return unpaged.
    pub async fn count_artifacts(
        &self,
        scopes: &[ScopePair],
        filter: &CoordinateFilter,
        strict: bool,
    ) -> AppResult<u64> {
        self.count(scopes, filter, strict, Projection::Count).await
    }

    /// Number of distinct coordinate sets among the matching entries.
    pub async fn count_coordinates(
        &self,
        scopes: &[ScopePair],
        filter: &CoordinateFilter,
        strict: bool,
    ) -> AppResult<u64> {
        self.count(scopes, filter, strict, Projection::CountDistinctCoordinates)
            .await
    }

    async fn count(
        &self,
        scopes: &[ScopePair],
        filter: &CoordinateFilter,
        strict: bool,
        projection: Projection,
    ) -> AppResult<u64> {
        require_scopes(scopes)?;
        let prepared = query::prepare_parameters(filter, strict)?;
        let query = query::build_count_query(scopes, &prepared, strict, projection);
        self.store.execute_count(&query).await
    }

    /// Strict, identity-ordered, unpaged listing within one repository.
    pub async fn find_artifact_list(
        &self,
        storage_id: &str,
        repository_id: &str,
        filter: &CoordinateFilter,
    ) -> AppResult<Vec<ArtifactEntry>> {
        let scope = ScopePair::new(storage_id, repository_id)?;
        self.list_artifacts(
            &[scope],
            filter,
            Paging::unbounded(),
            Some(IDENTITY_ORDER),
            true,
        )
        .await
    }

    /// Like [`find_artifact_list`](Self::find_artifact_list); `None` lists everything.
    pub async fn find_artifact_list_by_coordinates(
        &self,
        storage_id: &str,
        repository_id: &str,
        coordinates: Option<&ArtifactCoordinates>,
    ) -> AppResult<Vec<ArtifactEntry>> {
        let filter = coordinates.map(CoordinateFilter::from).unwrap_or_default();
        self.find_artifact_list(storage_id, repository_id, &filter)
            .await
    }

    pub async fn exists(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> AppResult<bool> {
        Ok(self
            .store
            .probe(storage_id, repository_id, path)
            .await?
            .is_some())
    }

    /// Entry stored at `path`, or `None` when nothing is indexed there.
    pub async fn find_one(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> AppResult<Option<ArtifactEntry>> {
        match self.store.probe(storage_id, repository_id, path).await? {
            Some(uuid) => self.store.get(uuid).await,
            None => Ok(None),
        }
    }

    /// Pass the entry straight to the store.
    pub async fn save(&self, entry: ArtifactEntry) -> AppResult<ArtifactEntry> {
        self.store.save(entry).await
    }

    /// Make all saved entries durable in the backing store.
    pub async fn flush(&self) -> AppResult<()> {
        self.store.flush().await
    }
}
