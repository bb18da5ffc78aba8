//! # Remote Search/View Gateway
//!
//! Warms the local index from a remote registry when a search or package view
//! hits a proxy repository. The dispatch rule is a heuristic:
//!
//! - no cached match yet: fetch inline, so the caller's query sees the results
//! - otherwise: fetch on a background task and let the caller read the
//!   (possibly stale) cache right away
//!
//! Two first-time requests racing can both fetch inline. That is harmless
//! because applying a document is idempotent. Nothing on this path is
//! returned as an error: every failure is logged and dropped.

use crate::config_store::ConfigurationStore;
use crate::error::AppResult;
use crate::feed::PackageFeedParser;
use crate::index::ArtifactIndexService;
use crate::types::{CoordinateFilter, ScopePair};
use crate::upstream::RemoteRegistry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// Raised by a search or view handler for a repository.
#[derive(Debug, Clone)]
pub struct RemoteRepositorySearchEvent {
    pub storage_id: String,
    pub repository_id: String,
    /// Local query the caller is about to run
    pub filter: CoordinateFilter,
    pub strict: bool,
}

/// What the caller asked the remote for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    Search { text: String, size: usize },
    View { package_id: String },
}

/// How the remote fetch was carried out.
#[derive(Debug)]
pub enum Dispatch {
    /// Not a remote repository, or the local count could not be read
    Skipped,
    /// Completed before the handler returned
    Synchronous,
    Background(JoinHandle<()>),
}

#[derive(Clone)]
pub struct RemoteSearchGateway {
    config: Arc<dyn ConfigurationStore>,
    index: ArtifactIndexService,
    remote: Arc<dyn RemoteRegistry>,
    parser: Arc<dyn PackageFeedParser>,
}

impl RemoteSearchGateway {
    pub fn new(
        config: Arc<dyn ConfigurationStore>,
        index: ArtifactIndexService,
        remote: Arc<dyn RemoteRegistry>,
        parser: Arc<dyn PackageFeedParser>,
    ) -> Self {
        Self {
            config,
            index,
            remote,
            parser,
        }
    }

    pub async fn handle_search(
        &self,
        event: &RemoteRepositorySearchEvent,
        text: &str,
        size: usize,
    ) -> Dispatch {
        self.handle(
            event,
            RemoteRequest::Search {
                text: text.to_string(),
                size,
            },
        )
        .await
    }

    pub async fn handle_view(&self, event: &RemoteRepositorySearchEvent, package_id: &str) -> Dispatch {
        self.handle(
            event,
            RemoteRequest::View {
                package_id: package_id.to_string(),
            },
        )
        .await
    }

    /// Fetch from the remote of the event's repository, inline or in the background.
    pub async fn handle(&self, event: &RemoteRepositorySearchEvent, request: RemoteRequest) -> Dispatch {
        let span = info_span!(
            "remote_fetch",
            storage = %event.storage_id,
            repository = %event.repository_id
        );
        let Some((scope, url)) = self.remote_scope(event).instrument(span.clone()).await else {
            return Dispatch::Skipped;
        };

        let cached = match self
            .index
            .count_artifacts(std::slice::from_ref(&scope), &event.filter, event.strict)
            .instrument(span.clone())
            .await
        {
            Ok(count) => count,
            Err(e) => {
                span.in_scope(|| warn!(error = %e, "Failed to count cached packages"));
                return Dispatch::Skipped;
            }
        };
        span.in_scope(|| debug!(cached, "Cached package count"));

        let job = self.clone().fetch(scope, url, request).instrument(span);
        if cached == 0 {
            job.await;
            Dispatch::Synchronous
        } else {
            Dispatch::Background(tokio::spawn(job))
        }
    }

    async fn remote_scope(&self, event: &RemoteRepositorySearchEvent) -> Option<(ScopePair, String)> {
        let repository = match self
            .config
            .repository(&event.storage_id, &event.repository_id)
            .await
        {
            Ok(Some(repository)) => repository,
            Ok(None) => {
                warn!("Search event for an unknown repository");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read repository configuration");
                return None;
            }
        };
        let url = repository.remote?.url;
        match ScopePair::new(&event.storage_id, &event.repository_id) {
            Ok(scope) => Some((scope, url)),
            Err(e) => {
                warn!(error = %e, "Search event has an invalid scope");
                None
            }
        }
    }

    async fn fetch(self, scope: ScopePair, url: String, request: RemoteRequest) {
        match self.fetch_and_apply(&scope, &url, &request).await {
            Ok(created) => info!(url = %url, request = ?request, created, "Remote fetch applied"),
            Err(e) => warn!(url = %url, request = ?request, error = %e, "Remote fetch failed"),
        }
    }

    async fn fetch_and_apply(
        &self,
        scope: &ScopePair,
        url: &str,
        request: &RemoteRequest,
    ) -> AppResult<usize> {
        match request {
            RemoteRequest::Search { text, size } => {
                let results = self.remote.search(url, text, *size).await?;
                self.parser.parse_search_result(scope, &results).await
            }
            RemoteRequest::View { package_id } => {
                let feed = self.remote.package(url, package_id).await?;
                self.parser.parse_feed(scope, &feed).await
            }
        }
    }
}
