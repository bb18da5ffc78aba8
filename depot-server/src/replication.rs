//! # Change-Feed Replication
//!
//! Pulls a remote registry's `_changes` feed into the local index, one bounded
//! batch at a time, and records the highest applied `seq` as the repository's
//! `last_change_id` after every batch.
//!
//! ## Guarantees
//!
//! - Entries are applied strictly in feed order, one at a time.
//! - Applied entries are flushed to the artifact store before the checkpoint
//!   moves past them. The checkpoint is persisted before the next batch is
//!   requested and never moves backwards. A crash at any point re-requests an
//!   already applied batch, so delivery is at-least-once.
//! - A run continues only while the checkpoint strictly increases, so it
//!   terminates even against a feed that always returns something.
//! - Runs of the same repository are serialized. Different repositories
//!   replicate in parallel.
//!
//! ## Failure handling
//!
//! | Failure                               | Effect                                         |
//! |---------------------------------------|------------------------------------------------|
//! | entry does not parse as a change      | batch aborted, run ends at the last good `seq` |
//! | document cannot be applied            | logged, `seq` still advances                   |
//! | transport error or timeout            | run ends at the last good `seq`                |
//! | body is not `{"results": [...]}`      | run ends at the last good `seq`                |

use crate::config::ReplicationConfig;
use crate::config_store::ConfigurationStore;
use crate::error::{AppError, AppResult, ErrorCode};
use crate::feed::PackageFeedParser;
use crate::npm::{Change, ChangesFeedReader};
use crate::types::ScopePair;
use crate::upstream::RemoteRegistry;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Changes requested per batch.
pub const CHANGES_BATCH_SIZE: usize = 500;

/// Upper bound on repositories replicated at the same time by [`ChangesFeedSynchronizer::sync_all`].
const MAX_PARALLEL_REPOSITORIES: usize = 4;

/// Why a replication run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A batch brought no progress: the local copy caught up
    Exhausted,
    MalformedEntry(String),
    MalformedFeed(String),
    Transport(String),
    Failed(String),
}

impl StopReason {
    fn from_error(err: &AppError) -> Self {
        match (err, err.error_code()) {
            (AppError::FeedEntry(reason), _) => StopReason::MalformedEntry(reason.clone()),
            (_, ErrorCode::TransportError) => StopReason::Transport(err.to_string()),
            (_, ErrorCode::ParseError) => StopReason::MalformedFeed(err.to_string()),
            _ => StopReason::Failed(err.to_string()),
        }
    }

    /// True when the run ended because the feed ran dry rather than on a failure.
    pub fn is_converged(&self) -> bool {
        matches!(self, StopReason::Exhausted)
    }
}

/// Outcome of one replication run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub scope: ScopePair,
    /// Checkpoint when the run started
    pub start: u64,
    /// Checkpoint when the run ended
    pub checkpoint: u64,
    pub batches: usize,
    pub applied: usize,
    /// Changes whose document could not be applied; their `seq` still counted
    pub failed: usize,
    pub stop: StopReason,
}

#[derive(Debug, Default)]
struct Batch {
    highest: Option<u64>,
    applied: usize,
    failed: usize,
    stop: Option<StopReason>,
}

pub struct ChangesFeedSynchronizer {
    config: Arc<dyn ConfigurationStore>,
    remote: Arc<dyn RemoteRegistry>,
    parser: Arc<dyn PackageFeedParser>,
    batch_size: usize,
    running: Mutex<HashMap<ScopePair, Arc<Mutex<()>>>>,
}

impl ChangesFeedSynchronizer {
    pub fn new(
        config: Arc<dyn ConfigurationStore>,
        remote: Arc<dyn RemoteRegistry>,
        parser: Arc<dyn PackageFeedParser>,
    ) -> Self {
        Self {
            config,
            remote,
            parser,
            batch_size: CHANGES_BATCH_SIZE,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn repository_lock(&self, scope: &ScopePair) -> Arc<Mutex<()>> {
        let mut running = self.running.lock().await;
        running.entry(scope.clone()).or_default().clone()
    }

    /// Replicate the changes feed of one repository until it converges or fails.
    ///
    /// Returns `None` when the repository has no remote or no replication
    /// configured. Transport and feed failures end the run and are reported in
    /// [`SyncReport::stop`], not as errors.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown repository, and any failure to make applied
    /// entries durable or to persist the checkpoint. In both cases the stored
    /// checkpoint stays at the last durable batch.
    #[instrument(skip_all, fields(storage = %storage_id, repository = %repository_id))]
    pub async fn fetch_remote_changes_feed(
        &self,
        storage_id: &str,
        repository_id: &str,
    ) -> AppResult<Option<SyncReport>> {
        let scope = ScopePair::new(storage_id, repository_id)?;
        let lock = self.repository_lock(&scope).await;
        let _running = lock.lock().await;

        // Read after taking the lock so a run queued behind another resumes
        // from the checkpoint that run persisted.
        let repository = self
            .config
            .repository(storage_id, repository_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Repository [{storage_id}]/[{repository_id}] not found"))
            })?;
        let Some(ReplicationConfig {
            replicate_url,
            last_change_id,
        }) = repository.replication().cloned()
        else {
            debug!("No change-feed replication configured, nothing to do");
            return Ok(None);
        };

        let mut report = SyncReport {
            scope: scope.clone(),
            start: last_change_id,
            checkpoint: last_change_id,
            batches: 0,
            applied: 0,
            failed: 0,
            stop: StopReason::Exhausted,
        };

        loop {
            let previous = report.checkpoint;
            let batch = self.fetch_batch(&scope, &replicate_url, previous + 1).await;
            report.batches += 1;
            report.applied += batch.applied;
            report.failed += batch.failed;

            if let Some(highest) = batch.highest.filter(|seq| *seq > previous) {
                self.parser.flush().await?;
                self.config
                    .save_last_change_id(storage_id, repository_id, highest)
                    .await?;
                report.checkpoint = highest;
            }

            if let Some(stop) = batch.stop {
                report.stop = stop;
                break;
            }
            if report.checkpoint <= previous {
                break;
            }
        }

        info!(
            start = report.start,
            checkpoint = report.checkpoint,
            batches = report.batches,
            applied = report.applied,
            failed = report.failed,
            stop = ?report.stop,
            "Changes feed replication finished"
        );
        Ok(Some(report))
    }

    /// Request and apply one batch starting at `since`.
    async fn fetch_batch(&self, scope: &ScopePair, replicate_url: &str, since: u64) -> Batch {
        let mut batch = Batch::default();
        debug!(url = %replicate_url, since, limit = self.batch_size, "Fetching remote changes");

        let mut body = match self.remote.changes(replicate_url, since, self.batch_size).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %replicate_url, since, error = %e, "Failed to fetch changes feed");
                batch.stop = Some(StopReason::from_error(&e));
                return batch;
            }
        };

        let mut reader = ChangesFeedReader::new();
        loop {
            let chunk = match body.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(since, error = %e, "Changes feed interrupted");
                    batch.stop = Some(StopReason::from_error(&e));
                    break;
                }
                None => {
                    if let Err(e) = reader.finish() {
                        error!(since, error = %e, "Changes feed is malformed");
                        batch.stop = Some(StopReason::from_error(&e));
                    }
                    break;
                }
            };

            let fed = reader.feed(&chunk);
            while let Some(raw) = reader.next_entry() {
                match serde_json::from_slice::<Change>(&raw) {
                    Ok(change) => self.apply(scope, change, &mut batch).await,
                    Err(e) => {
                        let err = AppError::FeedEntry(e.to_string());
                        error!(
                            since,
                            error = %err,
                            entry = %String::from_utf8_lossy(&raw),
                            "Failed to parse changes feed entry"
                        );
                        batch.stop = Some(StopReason::from_error(&err));
                        return batch;
                    }
                }
            }
            if let Err(e) = fed {
                error!(since, error = %e, "Changes feed is malformed");
                batch.stop = Some(StopReason::from_error(&e));
                break;
            }
        }

        debug!(
            since,
            highest = ?batch.highest,
            applied = batch.applied,
            failed = batch.failed,
            "Fetched remote changes"
        );
        batch
    }

    async fn apply(&self, scope: &ScopePair, change: Change, batch: &mut Batch) {
        match &change.doc {
            Some(doc) => match self.parser.parse_feed(scope, doc).await {
                Ok(_) => batch.applied += 1,
                Err(e) => {
                    warn!(
                        seq = change.seq,
                        package = ?doc.package_name(),
                        error = %e,
                        "Failed to apply package document"
                    );
                    batch.failed += 1;
                }
            },
            None => debug!(seq = change.seq, id = ?change.id, deleted = change.deleted, "Change carries no document"),
        }
        batch.highest = Some(batch.highest.map_or(change.seq, |h| h.max(change.seq)));
    }

    /// Replicate every repository that has replication configured.
    ///
    /// Each repository stays sequential; up to a few repositories run at once.
    pub async fn sync_all(&self) -> AppResult<Vec<(ScopePair, AppResult<Option<SyncReport>>)>> {
        let repositories = self.config.replicated_repositories().await?;
        info!(repositories = repositories.len(), "Replicating all remote repositories");

        let runs = repositories.into_iter().map(|(storage_id, repository)| async move {
            let result = self
                .fetch_remote_changes_feed(&storage_id, &repository.id)
                .await;
            if let Err(e) = &result {
                error!(storage = %storage_id, repository = %repository.id, error = %e, "Replication failed");
            }
            ScopePair::new(storage_id, repository.id).map(|scope| (scope, result))
        });

        stream::iter(runs)
            .buffer_unordered(MAX_PARALLEL_REPOSITORIES)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }
}
