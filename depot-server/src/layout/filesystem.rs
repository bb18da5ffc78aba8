use super::{DigestAlgorithm, LayoutProvider};
use crate::config::RepositoryConfig;
use crate::error::{AppError, AppResult};
use crate::hash_utils::digest_hex;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Byte-level access to physical storage.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn read(&self, path: &Path) -> AppResult<Vec<u8>>;
    async fn write(&self, path: &Path, content: &[u8]) -> AppResult<()>;
    async fn exists(&self, path: &Path) -> AppResult<bool>;
}

/// Local disk via tokio; writes are atomic renames.
pub struct LocalStorageProvider;

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    async fn read(&self, path: &Path) -> AppResult<Vec<u8>> {
        crate::storage::read_file(path).await
    }

    async fn write(&self, path: &Path, content: &[u8]) -> AppResult<()> {
        crate::storage::save_file(path, content).await
    }

    async fn exists(&self, path: &Path) -> AppResult<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    Match,
    Mismatch { expected: String, actual: String },
    Missing,
}

/// Per-algorithm verification result for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    pub path: String,
    pub results: BTreeMap<DigestAlgorithm, ChecksumStatus>,
}

impl ChecksumReport {
    pub fn is_valid(&self) -> bool {
        self.results.values().all(|s| *s == ChecksumStatus::Match)
    }
}

/// Filesystem view of one repository.
///
/// Owns the mapping from repository-relative paths to physical paths under its
/// root, and answers digest requirements by delegating to its layout provider.
pub struct LayoutFileSystem {
    repository: RepositoryConfig,
    root: PathBuf,
    storage: Arc<dyn StorageProvider>,
    layout: Arc<dyn LayoutProvider>,
}

impl LayoutFileSystem {
    pub fn new(
        repository: RepositoryConfig,
        root: PathBuf,
        storage: Arc<dyn StorageProvider>,
        layout: Arc<dyn LayoutProvider>,
    ) -> Self {
        Self {
            repository,
            root,
            storage,
            layout,
        }
    }

    pub fn repository(&self) -> &RepositoryConfig {
        &self.repository
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &dyn LayoutProvider {
        self.layout.as_ref()
    }

    pub fn digest_algorithms(&self) -> BTreeSet<DigestAlgorithm> {
        self.layout.digest_algorithms()
    }

    /// Map a repository-relative path to its physical location.
    ///
    /// # Errors
    ///
    /// `BadRequest` for absolute paths, empty or `.`/`..` segments, backslashes,
    /// and null or control characters.
    pub fn resolve(&self, logical_path: &str) -> AppResult<PathBuf> {
        if logical_path.is_empty() {
            return Err(AppError::BadRequest("Path cannot be empty".to_string()));
        }
        if logical_path.starts_with('/') || logical_path.contains('\\') {
            warn!(path = %logical_path, "Rejected non-relative repository path");
            return Err(AppError::BadRequest(format!(
                "Path must be relative and use '/': {logical_path}"
            )));
        }
        if logical_path.chars().any(|c| c.is_control()) {
            warn!(path = %logical_path, "Control character in repository path");
            return Err(AppError::BadRequest(
                "Path contains control characters".to_string(),
            ));
        }

        let mut physical = self.root.clone();
        for segment in logical_path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                warn!(path = %logical_path, "Path traversal attempt detected");
                return Err(AppError::BadRequest(format!(
                    "Illegal path segment {segment:?} in {logical_path}"
                )));
            }
            physical.push(segment);
        }
        Ok(physical)
    }

    /// Resolve an artifact path; checksum files themselves are not artifacts.
    fn artifact(&self, logical_path: &str) -> AppResult<PathBuf> {
        if self.layout.is_checksum(logical_path) {
            return Err(AppError::BadRequest(format!(
                "{logical_path} is a checksum file, not an artifact"
            )));
        }
        self.resolve(logical_path)
    }

    fn checksum_path(&self, logical_path: &str, algorithm: DigestAlgorithm) -> AppResult<PathBuf> {
        self.resolve(&format!("{logical_path}.{}", algorithm.extension()))
    }

    /// Compute and store every digest the layout requires for `logical_path`.
    pub async fn write_checksums(
        &self,
        logical_path: &str,
    ) -> AppResult<BTreeMap<DigestAlgorithm, String>> {
        let content = self.storage.read(&self.artifact(logical_path)?).await?;
        let mut written = BTreeMap::new();
        for algorithm in self.digest_algorithms() {
            let digest = digest_hex(algorithm, &content);
            self.storage
                .write(&self.checksum_path(logical_path, algorithm)?, digest.as_bytes())
                .await?;
            written.insert(algorithm, digest);
        }
        info!(
            repository = %self.repository.id,
            path = %logical_path,
            algorithms = written.len(),
            "Regenerated checksums"
        );
        Ok(written)
    }

    /// Compare stored checksum files against freshly computed digests.
    pub async fn verify_checksums(&self, logical_path: &str) -> AppResult<ChecksumReport> {
        let content = self.storage.read(&self.artifact(logical_path)?).await?;
        let mut results = BTreeMap::new();
        for algorithm in self.digest_algorithms() {
            let checksum_file = self.checksum_path(logical_path, algorithm)?;
            let status = if !self.storage.exists(&checksum_file).await? {
                ChecksumStatus::Missing
            } else {
                let stored = self.storage.read(&checksum_file).await?;
                // Checksum files may carry a trailing file name after the digest.
                let expected = String::from_utf8_lossy(&stored)
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_lowercase();
                let actual = digest_hex(algorithm, &content);
                if expected == actual {
                    ChecksumStatus::Match
                } else {
                    ChecksumStatus::Mismatch { expected, actual }
                }
            };
            debug!(path = %logical_path, algorithm = %algorithm, status = ?status, "Verified checksum");
            results.insert(algorithm, status);
        }
        Ok(ChecksumReport {
            path: logical_path.to_string(),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutProviderRegistry;
    use tempfile::TempDir;

    fn file_system(layout: &str, root: &Path) -> LayoutFileSystem {
        let repository = RepositoryConfig {
            id: "releases".to_string(),
            layout: layout.to_string(),
            remote: None,
        };
        LayoutProviderRegistry::default()
            .file_system(&repository, root, Arc::new(LocalStorageProvider))
            .unwrap()
    }

    #[test]
    fn test_resolve_maps_under_root() {
        let fs = file_system("raw", Path::new("/srv/storage0/releases"));
        assert_eq!(
            fs.resolve("tools/cli.zip").unwrap(),
            PathBuf::from("/srv/storage0/releases/tools/cli.zip")
        );
        for bad in ["", "/etc/passwd", "a/../b", "a//b", "./a", "a\\b", "a\0b"] {
            assert!(fs.resolve(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_digest_set_delegates_to_layout() {
        let npm = file_system("npm", Path::new("/tmp"));
        assert_eq!(npm.digest_algorithms(), npm.layout().digest_algorithms());
        assert!(npm.digest_algorithms().contains(&DigestAlgorithm::Sha512));
    }

    #[tokio::test]
    async fn test_write_then_verify_checksums() {
        let dir = TempDir::new().unwrap();
        let fs = file_system("raw", dir.path());
        LocalStorageProvider
            .write(&fs.resolve("tools/cli.zip").unwrap(), b"hello world")
            .await
            .unwrap();

        let written = fs.write_checksums("tools/cli.zip").await.unwrap();
        assert_eq!(
            written.keys().copied().collect::<Vec<_>>(),
            vec![DigestAlgorithm::Md5, DigestAlgorithm::Sha1]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tools/cli.zip.md5")).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tools/cli.zip.sha1")).unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );

        let report = fs.verify_checksums("tools/cli.zip").await.unwrap();
        assert!(report.is_valid());
    }

    #[tokio::test]
    async fn test_verify_reports_missing_and_mismatch() {
        let dir = TempDir::new().unwrap();
        let fs = file_system("raw", dir.path());
        let artifact = fs.resolve("a.bin").unwrap();
        LocalStorageProvider.write(&artifact, b"hello world").await.unwrap();
        std::fs::write(dir.path().join("a.bin.sha1"), "deadbeef  a.bin\n").unwrap();

        let report = fs.verify_checksums("a.bin").await.unwrap();
        assert!(!report.is_valid());
        assert_eq!(
            report.results[&DigestAlgorithm::Md5],
            ChecksumStatus::Missing
        );
        assert!(matches!(
            &report.results[&DigestAlgorithm::Sha1],
            ChecksumStatus::Mismatch { expected, .. } if expected == "deadbeef"
        ));
    }

    #[tokio::test]
    async fn test_checksum_files_are_not_artifacts() {
        let dir = TempDir::new().unwrap();
        let fs = file_system("raw", dir.path());
        LocalStorageProvider
            .write(&fs.resolve("a.bin.md5").unwrap(), b"5eb63bbbe01eeed093cb22bb8f5acdc3")
            .await
            .unwrap();

        assert!(matches!(
            fs.write_checksums("a.bin.md5").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            fs.verify_checksums("a.bin.md5").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(!dir.path().join("a.bin.md5.sha1").exists());
    }
}
