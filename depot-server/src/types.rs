//! Core data model: scope pairs, artifact coordinates and artifact entries.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A `(storage id, repository id)` tuple bounding a query.
///
/// Both members are guaranteed non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopePair {
    storage_id: String,
    repository_id: String,
}

impl ScopePair {
    pub fn new(storage_id: impl Into<String>, repository_id: impl Into<String>) -> AppResult<Self> {
        let storage_id = storage_id.into();
        let repository_id = repository_id.into();
        if storage_id.trim().is_empty() || repository_id.trim().is_empty() {
            return Err(AppError::InvalidScope(
                "Both 'storageId' and 'repositoryId' should be provided".to_string(),
            ));
        }
        Ok(Self {
            storage_id,
            repository_id,
        })
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }
}

impl fmt::Display for ScopePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.storage_id, self.repository_id)
    }
}

/// Ordered field set identifying one artifact within a repository format,
/// e.g. `{name: "lodash", version: "4.17.21", extension: "tgz"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactCoordinates(IndexMap<String, String>);

impl ArtifactCoordinates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ArtifactCoordinates {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Metadata kept for artifacts discovered on a remote registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteArtifactMetadata {
    pub last_seen: DateTime<Utc>,
    /// True once the artifact content itself has been fetched
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

/// A persisted artifact record.
///
/// Coordinates are fixed at construction; there is no way to replace them on an
/// existing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub uuid: Uuid,
    pub storage_id: String,
    pub repository_id: String,
    pub path: String,
    coordinates: ArtifactCoordinates,
    /// Owned by the store for optimistic locking; callers pass it through untouched
    #[serde(default)]
    pub version: u64,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteArtifactMetadata>,
}

impl ArtifactEntry {
    pub fn new(scope: &ScopePair, path: impl Into<String>, coordinates: ArtifactCoordinates) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            storage_id: scope.storage_id().to_string(),
            repository_id: scope.repository_id().to_string(),
            path: path.into(),
            coordinates,
            version: 0,
            created: now,
            last_updated: now,
            download_count: 0,
            remote: None,
        }
    }

    pub fn coordinates(&self) -> &ArtifactCoordinates {
        &self.coordinates
    }
}

/// Coordinate constraints for list/count queries.
///
/// A `None` value means "no constraint" and is dropped before the query is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinateFilter(IndexMap<String, Option<String>>);

impl CoordinateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), Some(value.into()));
        self
    }

    pub fn with_optional(mut self, field: impl Into<String>, value: Option<String>) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&ArtifactCoordinates> for CoordinateFilter {
    fn from(coordinates: &ArtifactCoordinates) -> Self {
        Self(
            coordinates
                .iter()
                .map(|(k, v)| (k.to_string(), Some(v.to_string())))
                .collect(),
        )
    }
}

/// Result window. Zero disables the bound it stands for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Paging {
    pub skip: usize,
    pub limit: usize,
}

impl Paging {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self { skip, limit }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_pair_rejects_blank_members() {
        assert!(ScopePair::new("storage0", "npm").is_ok());
        assert!(matches!(
            ScopePair::new(" ", "npm"),
            Err(AppError::InvalidScope(_))
        ));
        assert!(matches!(
            ScopePair::new("storage0", ""),
            Err(AppError::InvalidScope(_))
        ));
    }

    #[test]
    fn test_coordinates_keep_insertion_order() {
        let coordinates = ArtifactCoordinates::new()
            .with("name", "lodash")
            .with("version", "4.17.21")
            .with("extension", "tgz");
        let fields: Vec<_> = coordinates.iter().map(|(k, _)| k).collect();
        assert_eq!(fields, vec!["name", "version", "extension"]);
    }

    #[test]
    fn test_entry_serializes_coordinates_inline() {
        let scope = ScopePair::new("storage0", "npm").unwrap();
        let entry = ArtifactEntry::new(
            &scope,
            "lodash/-/lodash-4.17.21.tgz",
            ArtifactCoordinates::new().with("name", "lodash"),
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["coordinates"]["name"], "lodash");
        assert_eq!(json["storage_id"], "storage0");
        assert!(json.get("remote").is_none());
    }
}
