//! # Artifact Store
//!
//! [`ArtifactStore`] is the seam to the persistent metadata store: it executes
//! built [`Query`]s, probes the `(storage, repository, path)` index and saves
//! entries. [`MemoryArtifactStore`] is the bundled implementation: a hash index
//! for probes, full predicate evaluation for queries, optimistic versioning on
//! save, and an optional JSON snapshot file.

use crate::error::{AppError, AppResult};
use crate::query::{BoundParams, Field, Operand, OrderBy, Predicate, Projection, Query};
use crate::types::ArtifactEntry;
use async_trait::async_trait;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Execute a [`Projection::Rows`] query.
    async fn execute(&self, query: &Query) -> AppResult<Vec<ArtifactEntry>>;

    /// Execute a count query and return the scalar result.
    async fn execute_count(&self, query: &Query) -> AppResult<u64>;

    /// Exact-match index probe on `(storage, repository, path)`.
    async fn probe(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> AppResult<Option<Uuid>>;

    /// Load an entry by identity.
    async fn get(&self, uuid: Uuid) -> AppResult<Option<ArtifactEntry>>;

    /// Insert or update an entry under the store's own versioning scheme.
    async fn save(&self, entry: ArtifactEntry) -> AppResult<ArtifactEntry>;

    /// Make every saved entry durable. Stores that persist on each save keep
    /// the default.
    async fn flush(&self) -> AppResult<()> {
        Ok(())
    }
}

type PathKey = (String, String, String);

fn path_key(storage_id: &str, repository_id: &str, path: &str) -> PathKey {
    (
        storage_id.to_string(),
        repository_id.to_string(),
        path.to_string(),
    )
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Uuid, ArtifactEntry>,
    by_path: HashMap<PathKey, Uuid>,
}

/// In-process artifact store.
///
/// `save` enforces optimistic locking: the incoming `version` must equal the
/// stored one, and the store increments it. A path may belong to only one entry
/// per repository.
#[derive(Default)]
pub struct MemoryArtifactStore {
    inner: RwLock<Inner>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store mirrored to a JSON snapshot, loading it when present.
    pub async fn open(snapshot_path: impl Into<PathBuf>) -> AppResult<Self> {
        let snapshot_path = snapshot_path.into();
        let mut inner = Inner::default();
        if snapshot_path.exists() {
            let content = crate::storage::read_file(&snapshot_path).await?;
            let entries: Vec<ArtifactEntry> = serde_json::from_slice(&content)?;
            for entry in entries {
                inner.by_path.insert(
                    path_key(&entry.storage_id, &entry.repository_id, &entry.path),
                    entry.uuid,
                );
                inner.entries.insert(entry.uuid, entry);
            }
            info!(
                path = %snapshot_path.display(),
                entries = inner.entries.len(),
                "Loaded artifact index snapshot"
            );
        }
        Ok(Self {
            inner: RwLock::new(inner),
            snapshot_path: Some(snapshot_path),
        })
    }

    /// Write all entries to the snapshot file. No-op without a snapshot path.
    pub async fn persist(&self) -> AppResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let json = {
            let inner = self.inner.read().await;
            let mut entries: Vec<&ArtifactEntry> = inner.entries.values().collect();
            entries.sort_by_key(|e| e.uuid);
            serde_json::to_vec_pretty(&entries)?
        };
        crate::storage::save_file(path, json).await
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    fn select<'a>(inner: &'a Inner, query: &Query) -> AppResult<Vec<&'a ArtifactEntry>> {
        let mut selected = Vec::new();
        for entry in inner.entries.values() {
            if matches(&query.predicate, entry, &query.params)? {
                selected.push(entry);
            }
        }
        Ok(selected)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn execute(&self, query: &Query) -> AppResult<Vec<ArtifactEntry>> {
        if query.projection != Projection::Rows {
            return Err(AppError::Store(format!(
                "Row execution of a {:?} query",
                query.projection
            )));
        }
        let inner = self.inner.read().await;
        let mut rows = Self::select(&inner, query)?;

        // Identity is the final tie-breaker so windows are stable across calls.
        match &query.order_by {
            Some(OrderBy::Coordinate(field)) => rows.sort_by(|a, b| {
                compare_coordinate(a, b, field).then_with(|| a.uuid.cmp(&b.uuid))
            }),
            Some(OrderBy::Identity) | None => rows.sort_by_key(|e| e.uuid),
        }

        let skip = query.skip.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(skip).take(limit).cloned().collect())
    }

    async fn execute_count(&self, query: &Query) -> AppResult<u64> {
        let inner = self.inner.read().await;
        let rows = Self::select(&inner, query)?;
        let count = match query.projection {
            Projection::Count => rows.len(),
            Projection::CountDistinctCoordinates => rows
                .iter()
                .map(|e| e.coordinates().iter().collect::<Vec<(&str, &str)>>())
                .collect::<HashSet<_>>()
                .len(),
            Projection::Rows => {
                return Err(AppError::Store(
                    "Count execution of a row query".to_string(),
                ))
            }
        };
        Ok(count as u64)
    }

    async fn probe(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> AppResult<Option<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_path
            .get(&path_key(storage_id, repository_id, path))
            .copied())
    }

    async fn get(&self, uuid: Uuid) -> AppResult<Option<ArtifactEntry>> {
        Ok(self.inner.read().await.entries.get(&uuid).cloned())
    }

    async fn save(&self, mut entry: ArtifactEntry) -> AppResult<ArtifactEntry> {
        let mut inner = self.inner.write().await;
        let key = path_key(&entry.storage_id, &entry.repository_id, &entry.path);

        if let Some(owner) = inner.by_path.get(&key) {
            if *owner != entry.uuid {
                return Err(AppError::Conflict(format!(
                    "Path already indexed: {}/{}/{}",
                    entry.storage_id, entry.repository_id, entry.path
                )));
            }
        }

        if let Some(existing) = inner.entries.get(&entry.uuid) {
            if existing.version != entry.version {
                return Err(AppError::Conflict(format!(
                    "Stale artifact entry {}: version {} but store holds {}",
                    entry.uuid, entry.version, existing.version
                )));
            }
            let old_key = path_key(&existing.storage_id, &existing.repository_id, &existing.path);
            if old_key != key {
                inner.by_path.remove(&old_key);
            }
            entry.version += 1;
        }

        inner.by_path.insert(key, entry.uuid);
        inner.entries.insert(entry.uuid, entry.clone());
        debug!(uuid = %entry.uuid, path = %entry.path, version = entry.version, "Saved artifact entry");
        Ok(entry)
    }

    async fn flush(&self) -> AppResult<()> {
        self.persist().await
    }
}

fn compare_coordinate(a: &ArtifactEntry, b: &ArtifactEntry, field: &str) -> Ordering {
    // Entries without the field sort after those that have it.
    match (a.coordinates().get(field), b.coordinates().get(field)) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn field_value<'a>(field: &Field, entry: &'a ArtifactEntry) -> Option<&'a str> {
    match field {
        Field::StorageId => Some(&entry.storage_id),
        Field::RepositoryId => Some(&entry.repository_id),
        Field::Coordinate(name) => entry.coordinates().get(name),
    }
}

fn operand_value<'a>(operand: &Operand, entry: &'a ArtifactEntry) -> Option<Cow<'a, str>> {
    match operand {
        Operand::Field(field) => field_value(field, entry).map(Cow::Borrowed),
        Operand::Lower(field) => field_value(field, entry).map(|v| Cow::Owned(v.to_lowercase())),
    }
}

fn param<'a>(params: &'a BoundParams, name: &str) -> AppResult<&'a str> {
    params
        .get(name)
        .ok_or_else(|| AppError::Store(format!("Unbound query parameter :{name}")))
}

/// Evaluate a predicate against one entry.
fn matches(predicate: &Predicate, entry: &ArtifactEntry, params: &BoundParams) -> AppResult<bool> {
    Ok(match predicate {
        Predicate::True => true,
        Predicate::And(terms) => {
            for term in terms {
                if !matches(term, entry, params)? {
                    return Ok(false);
                }
            }
            true
        }
        Predicate::Or(terms) => {
            for term in terms {
                if matches(term, entry, params)? {
                    return Ok(true);
                }
            }
            false
        }
        Predicate::Eq(operand, name) => {
            let expected = param(params, name)?;
            operand_value(operand, entry).is_some_and(|v| v == expected)
        }
        Predicate::Like(operand, name) => {
            let pattern = param(params, name)?;
            operand_value(operand, entry).is_some_and(|v| like_match(pattern, &v))
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    Char(char),
    One,
    Many,
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Many,
            '_' => LikeToken::One,
            '\\' => LikeToken::Char(chars.next().unwrap_or('\\')),
            c => LikeToken::Char(c),
        });
    }
    tokens
}

/// SQL `LIKE` match with `%`, `_` and backslash escapes.
pub(crate) fn like_match(pattern: &str, text: &str) -> bool {
    let tokens = like_tokens(pattern);
    let text: Vec<char> = text.chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(LikeToken::Many) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(LikeToken::One) => {
                t += 1;
                p += 1;
            }
            Some(LikeToken::Char(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, mark)) => {
                    p = star + 1;
                    t = mark + 1;
                    backtrack = Some((star, mark + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|t| *t == LikeToken::Many)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{self, PreparedCoordinates};
    use crate::types::{ArtifactCoordinates, CoordinateFilter, Paging, ScopePair};
    use tempfile::TempDir;

    fn entry(repository: &str, path: &str, name: &str, version: &str) -> ArtifactEntry {
        ArtifactEntry::new(
            &ScopePair::new("storage0", repository).unwrap(),
            path,
            ArtifactCoordinates::new()
                .with("name", name)
                .with("version", version),
        )
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("%lodash%", "lodash"));
        assert!(like_match("%lodash%", "lodash.merge"));
        assert!(like_match("%das%", "lodash"));
        assert!(!like_match("%lodash%", "underscore"));
        assert!(like_match("lo_ash", "lodash"));
        assert!(!like_match("lo_ash", "loash"));
        assert!(like_match(r"%a\_b%", "xa_by"));
        assert!(!like_match(r"%a\_b%", "xacby"));
        assert!(like_match("%", ""));
        assert!(!like_match("a", ""));
        assert!(like_match("%a%b%", "xxaxxbxx"));
    }

    #[tokio::test]
    async fn test_probe_follows_saved_path() {
        let store = MemoryArtifactStore::new();
        let saved = store
            .save(entry("npm", "lodash/-/lodash-1.0.0.tgz", "lodash", "1.0.0"))
            .await
            .unwrap();

        let found = store
            .probe("storage0", "npm", "lodash/-/lodash-1.0.0.tgz")
            .await
            .unwrap();
        assert_eq!(found, Some(saved.uuid));
        assert_eq!(store.probe("storage0", "raw", "lodash/-/lodash-1.0.0.tgz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_rejects_stale_version() {
        let store = MemoryArtifactStore::new();
        let first = store
            .save(entry("npm", "a.tgz", "a", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(first.version, 0);

        let mut updated = first.clone();
        updated.download_count = 1;
        let updated = store.save(updated).await.unwrap();
        assert_eq!(updated.version, 1);

        let mut stale = first;
        stale.download_count = 7;
        assert!(matches!(store.save(stale).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_path() {
        let store = MemoryArtifactStore::new();
        store.save(entry("npm", "a.tgz", "a", "1.0.0")).await.unwrap();
        let err = store
            .save(entry("npm", "a.tgz", "a", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_execute_orders_by_coordinate_with_identity_tiebreak() {
        let store = MemoryArtifactStore::new();
        for (path, name, version) in [
            ("c.tgz", "c", "2.0.0"),
            ("a.tgz", "a", "1.0.0"),
            ("b.tgz", "b", "1.0.0"),
        ] {
            store.save(entry("npm", path, name, version)).await.unwrap();
        }
        let scopes = vec![ScopePair::new("storage0", "npm").unwrap()];
        let query = query::build_coordinates_query(
            &scopes,
            &PreparedCoordinates::default(),
            Paging::unbounded(),
            Some("version"),
            true,
        )
        .unwrap();

        let rows = store.execute(&query).await.unwrap();
        let versions: Vec<_> = rows
            .iter()
            .map(|e| e.coordinates().get("version").unwrap())
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.0.0", "2.0.0"]);
        assert!(rows[0].uuid < rows[1].uuid);
    }

    #[tokio::test]
    async fn test_count_distinct_coordinates() {
        let store = MemoryArtifactStore::new();
        store.save(entry("npm", "a.tgz", "a", "1.0.0")).await.unwrap();
        store.save(entry("raw", "a.tgz", "a", "1.0.0")).await.unwrap();
        store.save(entry("raw", "b.tgz", "b", "1.0.0")).await.unwrap();

        let scopes = vec![
            ScopePair::new("storage0", "npm").unwrap(),
            ScopePair::new("storage0", "raw").unwrap(),
        ];
        let prepared =
            query::prepare_parameters(&CoordinateFilter::new(), true).unwrap();
        let rows = query::build_count_query(&scopes, &prepared, true, Projection::Count);
        let distinct = query::build_count_query(
            &scopes,
            &prepared,
            true,
            Projection::CountDistinctCoordinates,
        );
        assert_eq!(store.execute_count(&rows).await.unwrap(), 3);
        assert_eq!(store.execute_count(&distinct).await.unwrap(), 2);
        assert!(store.execute(&rows).await.is_err());
    }

    #[tokio::test]
    async fn test_distinct_coordinates_keep_field_boundaries() {
        let store = MemoryArtifactStore::new();
        let scope = ScopePair::new("storage0", "raw").unwrap();
        store
            .save(ArtifactEntry::new(&scope, "one", ArtifactCoordinates::new().with("a", "b=c")))
            .await
            .unwrap();
        store
            .save(ArtifactEntry::new(&scope, "two", ArtifactCoordinates::new().with("a=b", "c")))
            .await
            .unwrap();

        let prepared = query::prepare_parameters(&CoordinateFilter::new(), true).unwrap();
        let distinct = query::build_count_query(
            &[scope],
            &prepared,
            true,
            Projection::CountDistinctCoordinates,
        );
        assert_eq!(store.execute_count(&distinct).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");

        let store = MemoryArtifactStore::open(&path).await.unwrap();
        let saved = store.save(entry("npm", "a.tgz", "a", "1.0.0")).await.unwrap();
        store.persist().await.unwrap();

        let reopened = MemoryArtifactStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(
            reopened.probe("storage0", "npm", "a.tgz").await.unwrap(),
            Some(saved.uuid)
        );
        assert_eq!(reopened.get(saved.uuid).await.unwrap(), Some(saved));
    }
}
