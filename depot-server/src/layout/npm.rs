use super::{DigestAlgorithm, LayoutProvider};
use crate::error::{AppError, AppResult};
use crate::types::ArtifactCoordinates;
use std::collections::BTreeSet;

/// npm tarball layout: `<name>/-/<base>-<version>.<extension>`.
///
/// npm metadata publishes a SHA-1 `shasum` and a SHA-512 `integrity`, so both
/// are stored with every tarball.
pub struct NpmLayoutProvider;

impl NpmLayoutProvider {
    pub const NAME: &'static str = "name";
    pub const VERSION: &'static str = "version";
    pub const EXTENSION: &'static str = "extension";
}

impl LayoutProvider for NpmLayoutProvider {
    fn alias(&self) -> &'static str {
        "npm"
    }

    fn digest_algorithms(&self) -> BTreeSet<DigestAlgorithm> {
        BTreeSet::from([DigestAlgorithm::Sha1, DigestAlgorithm::Sha512])
    }

    fn artifact_path(&self, coordinates: &ArtifactCoordinates) -> AppResult<String> {
        let required = |field: &str| {
            coordinates
                .get(field)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::BadRequest(format!("npm coordinates lack '{field}'")))
        };
        let name = required(Self::NAME)?;
        let version = required(Self::VERSION)?;
        let extension = coordinates.get(Self::EXTENSION).unwrap_or("tgz");

        // Scoped packages keep the scope in the directory but not the file name.
        let base = name.rsplit('/').next().unwrap_or(name);
        Ok(format!("{name}/-/{base}-{version}.{extension}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path() {
        let coordinates = ArtifactCoordinates::new()
            .with("name", "lodash")
            .with("version", "4.17.21");
        assert_eq!(
            NpmLayoutProvider.artifact_path(&coordinates).unwrap(),
            "lodash/-/lodash-4.17.21.tgz"
        );
    }

    #[test]
    fn test_scoped_artifact_path() {
        let coordinates = ArtifactCoordinates::new()
            .with("name", "@types/node")
            .with("version", "20.1.0")
            .with("extension", "tgz");
        assert_eq!(
            NpmLayoutProvider.artifact_path(&coordinates).unwrap(),
            "@types/node/-/node-20.1.0.tgz"
        );
    }

    #[test]
    fn test_missing_version_rejected() {
        let coordinates = ArtifactCoordinates::new().with("name", "lodash");
        assert!(NpmLayoutProvider.artifact_path(&coordinates).is_err());
    }
}
