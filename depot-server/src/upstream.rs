//! # Remote Registry Client
//!
//! [`RemoteRegistry`] is the network seam used by the synchronizer and the
//! search gateway. [`UpstreamClient`] implements it over `reqwest`; tests
//! substitute in-process fakes.
//!
//! Every request is bounded by `upstream.timeout_secs`. A timeout, a refused
//! connection and a non-success status all surface as [`AppError::Transport`].
//! Response bodies are owned by the returned value, so the connection is
//! released as soon as the caller drops it, whichever way the caller exits.

use crate::config::UpstreamSettings;
use crate::error::{AppError, AppResult};
use crate::npm::{PackageFeed, SearchResults};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::{Client, Response};
use tracing::{debug, info, warn};
use url::Url;

/// HTTP endpoints of a remote npm-style registry.
#[async_trait]
pub trait RemoteRegistry: Send + Sync {
    /// Body of `GET {replicate_url}/_changes?since=..&include_docs=true&limit=..`,
    /// as raw chunks in arrival order.
    async fn changes(
        &self,
        replicate_url: &str,
        since: u64,
        limit: usize,
    ) -> AppResult<BoxStream<'static, AppResult<Bytes>>>;

    /// `GET {url}/-/v1/search?text=..&size=..`
    async fn search(&self, url: &str, text: &str, size: usize) -> AppResult<SearchResults>;

    /// `GET {url}/{package_id}`
    async fn package(&self, url: &str, package_id: &str) -> AppResult<PackageFeed>;
}

pub struct UpstreamClient {
    client: Client,
    enabled: bool,
}

impl UpstreamClient {
    /// Build a client with the configured timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn new(settings: &UpstreamSettings) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            enabled: settings.enabled,
        })
    }

    fn ensure_enabled(&self) -> AppResult<()> {
        if !self.enabled {
            return Err(AppError::Transport(
                "Upstream registry lookup is disabled in configuration".to_string(),
            ));
        }
        Ok(())
    }

    async fn get(&self, url: Url) -> AppResult<Response> {
        self.ensure_enabled()?;
        debug!(url = %url, "Fetching from upstream registry");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Upstream request failed");
            AppError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Upstream registry returned an error status");
            return Err(AppError::Transport(format!("{url} returned {status}")));
        }
        Ok(response)
    }
}

/// Join path segments onto a base URL, percent-encoding each segment.
fn endpoint(base: &str, segments: &[&str]) -> AppResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| AppError::BadRequest(format!("Invalid registry URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| AppError::BadRequest(format!("Registry URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl RemoteRegistry for UpstreamClient {
    async fn changes(
        &self,
        replicate_url: &str,
        since: u64,
        limit: usize,
    ) -> AppResult<BoxStream<'static, AppResult<Bytes>>> {
        let mut url = endpoint(replicate_url, &["_changes"])?;
        url.query_pairs_mut()
            .append_pair("since", &since.to_string())
            .append_pair("include_docs", "true")
            .append_pair("limit", &limit.to_string());

        let response = self.get(url).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(AppError::from))
            .boxed())
    }

    async fn search(&self, url: &str, text: &str, size: usize) -> AppResult<SearchResults> {
        let mut search_url = endpoint(url, &["-", "v1", "search"])?;
        search_url
            .query_pairs_mut()
            .append_pair("text", text)
            .append_pair("size", &size.to_string());

        let results: SearchResults = self.get(search_url).await?.json().await?;
        info!(text = %text, hits = results.objects.len(), "Fetched remote search results");
        Ok(results)
    }

    async fn package(&self, url: &str, package_id: &str) -> AppResult<PackageFeed> {
        // Scoped ids (`@scope/name`) travel as a single encoded segment.
        let package_url = endpoint(url, &[package_id])?;
        let feed: PackageFeed = self.get(package_url).await?.json().await?;
        info!(package = %package_id, versions = feed.versions.len(), "Fetched remote package document");
        Ok(feed)
    }
}
