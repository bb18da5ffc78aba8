use super::{DigestAlgorithm, LayoutProvider};
use crate::error::{AppError, AppResult};
use crate::types::ArtifactCoordinates;
use std::collections::BTreeSet;

/// Raw blob layout: the single `path` coordinate is the storage path.
///
/// Every blob carries MD5 and SHA-1 checksum files.
pub struct RawLayoutProvider;

impl RawLayoutProvider {
    pub const PATH: &'static str = "path";
}

impl LayoutProvider for RawLayoutProvider {
    fn alias(&self) -> &'static str {
        "raw"
    }

    fn digest_algorithms(&self) -> BTreeSet<DigestAlgorithm> {
        BTreeSet::from([DigestAlgorithm::Md5, DigestAlgorithm::Sha1])
    }

    fn artifact_path(&self, coordinates: &ArtifactCoordinates) -> AppResult<String> {
        coordinates
            .get(Self::PATH)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("raw coordinates lack 'path'".to_string()))
    }
}
