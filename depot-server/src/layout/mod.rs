//! # Repository Layouts
//!
//! Each repository declares a layout alias (`npm`, `raw`, ...). The alias is
//! resolved exactly once, by [`LayoutProviderRegistry`], into a [`LayoutProvider`]
//! that answers every format-specific question: which digests must accompany an
//! artifact and where an artifact with given coordinates lives. Code that walks
//! repository storage goes through [`LayoutFileSystem`] and never looks at the
//! alias itself.
//!
//! ```text
//! LayoutProvider (trait)
//!     ├── NpmLayoutProvider   SHA-1, SHA-512
//!     └── RawLayoutProvider   MD5, SHA-1
//! ```

mod filesystem;
mod npm;
mod raw;

pub use filesystem::{
    ChecksumReport, ChecksumStatus, LayoutFileSystem, LocalStorageProvider, StorageProvider,
};
pub use npm::NpmLayoutProvider;
pub use raw::RawLayoutProvider;

use crate::config::RepositoryConfig;
use crate::error::{AppError, AppResult};
use crate::types::ArtifactCoordinates;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Digest algorithms a layout can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Canonical algorithm name, e.g. `SHA-256`
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Extension of the checksum file stored next to an artifact
    pub fn extension(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Format-specific storage policy.
///
/// Implementations are pure: no I/O, no interior state that changes at runtime.
pub trait LayoutProvider: Send + Sync {
    /// Alias repositories use to select this layout
    fn alias(&self) -> &'static str;

    /// Digests that must be computed and stored alongside every artifact
    fn digest_algorithms(&self) -> BTreeSet<DigestAlgorithm>;

    /// Repository-relative path of the artifact identified by `coordinates`.
    fn artifact_path(&self, coordinates: &ArtifactCoordinates) -> AppResult<String>;

    /// Whether `path` names a checksum file this layout maintains.
    fn is_checksum(&self, path: &str) -> bool {
        self.digest_algorithms().iter().any(|algorithm| {
            path.strip_suffix(algorithm.extension())
                .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

/// Lookup from layout alias to provider.
#[derive(Clone)]
pub struct LayoutProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn LayoutProvider>>,
}

impl Default for LayoutProviderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
        };
        registry.register(Arc::new(NpmLayoutProvider));
        registry.register(Arc::new(RawLayoutProvider));
        registry
    }
}

impl LayoutProviderRegistry {
    pub fn register(&mut self, provider: Arc<dyn LayoutProvider>) {
        self.providers.insert(provider.alias(), provider);
    }

    pub fn get(&self, alias: &str) -> AppResult<Arc<dyn LayoutProvider>> {
        self.providers
            .get(alias)
            .cloned()
            .ok_or_else(|| AppError::BadRequest(format!("Unknown repository layout: {alias}")))
    }

    /// Provider for a repository's declared layout.
    pub fn provider_for(&self, repository: &RepositoryConfig) -> AppResult<Arc<dyn LayoutProvider>> {
        self.get(&repository.layout)
    }

    /// Digest set required by a repository's layout.
    pub fn digest_algorithms(&self, repository: &RepositoryConfig) -> AppResult<BTreeSet<DigestAlgorithm>> {
        Ok(self.provider_for(repository)?.digest_algorithms())
    }

    /// Pair a repository with its layout provider over a physical root.
    pub fn file_system(
        &self,
        repository: &RepositoryConfig,
        root: impl Into<PathBuf>,
        storage: Arc<dyn StorageProvider>,
    ) -> AppResult<LayoutFileSystem> {
        let layout = self.provider_for(repository)?;
        Ok(LayoutFileSystem::new(
            repository.clone(),
            root.into(),
            storage,
            layout,
        ))
    }
}
