//! `depot` command-line tool
//!
//! Operates on a JSON configuration file and the artifact index snapshot kept
//! under the configured data directory.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use depot_server::gateway::Dispatch;
use depot_server::layout::LocalStorageProvider;
use depot_server::{
    ArtifactIndexService, ChangesFeedSynchronizer, ConfigurationStore, CoordinateFilter,
    FileConfigurationStore, LayoutProviderRegistry, MemoryArtifactStore, NpmPackageFeedParser,
    Paging, RemoteRepositorySearchEvent, RemoteSearchGateway, ScopePair, UpstreamClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Artifact index, layout and replication tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(long, short, default_value = "depot.json", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate remote change feeds into the index
    Sync {
        /// Only this repository (`storage/repository`); all replicated ones otherwise
        #[arg(long)]
        repository: Option<String>,
    },

    /// List indexed artifacts
    Search {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(long, default_value_t = 0)]
        skip: usize,

        /// Maximum results, 0 for all
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Coordinate to order by, or `uuid`
        #[arg(long)]
        order_by: Option<String>,

        /// Warm the cache from the first scope's remote with this search text
        #[arg(long)]
        remote: Option<String>,
    },

    /// Count indexed artifacts
    Count {
        #[command(flatten)]
        query: QueryArgs,

        /// Count distinct coordinate sets instead of entries
        #[arg(long)]
        distinct: bool,
    },

    /// Show the layout and required digests of a repository
    Layout {
        /// `storage/repository`
        repository: String,
    },

    /// Verify or regenerate the checksum files of an artifact
    Checksums {
        /// `storage/repository`
        repository: String,

        /// Repository-relative artifact path
        path: String,

        /// Regenerate instead of verifying
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// `storage/repository`, repeatable
    #[arg(long = "scope", required = true)]
    scopes: Vec<String>,

    /// `field=value`, repeatable
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Exact (case-insensitive) matching instead of substring
    #[arg(long)]
    strict: bool,
}

impl QueryArgs {
    fn scopes(&self) -> Result<Vec<ScopePair>> {
        self.scopes.iter().map(|s| parse_scope(s)).collect()
    }

    fn filter(&self) -> Result<CoordinateFilter> {
        self.filters.iter().try_fold(CoordinateFilter::new(), |filter, raw| {
            let (field, value) = raw
                .split_once('=')
                .ok_or_else(|| anyhow!("filter must be field=value: {raw}"))?;
            Ok(filter.with(field, value))
        })
    }
}

fn parse_scope(raw: &str) -> Result<ScopePair> {
    let (storage_id, repository_id) = raw
        .split_once('/')
        .ok_or_else(|| anyhow!("expected storage/repository, got {raw}"))?;
    Ok(ScopePair::new(storage_id, repository_id)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_store = Arc::new(
        FileConfigurationStore::open(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?,
    );
    let config = config_store.snapshot().await;
    let _log_guard = depot_logging::init_subscriber(&config.logging.clone().with_env_overrides());

    let store = Arc::new(MemoryArtifactStore::open(config.data_dir.join("index.json")).await?);
    let index = ArtifactIndexService::new(store.clone());
    let parser = Arc::new(NpmPackageFeedParser::new(index.clone()));

    match cli.command {
        Commands::Sync { repository } => {
            let remote = Arc::new(UpstreamClient::new(&config.upstream)?);
            let synchronizer = ChangesFeedSynchronizer::new(config_store.clone(), remote, parser);
            let reports = match repository {
                Some(raw) => {
                    let scope = parse_scope(&raw)?;
                    let report = synchronizer
                        .fetch_remote_changes_feed(scope.storage_id(), scope.repository_id())
                        .await;
                    vec![(scope, report)]
                }
                None => synchronizer.sync_all().await?,
            };
            store.persist().await?;

            for (scope, report) in reports {
                match report {
                    Ok(Some(r)) => println!(
                        "{scope}: {} -> {} ({} applied, {} failed, {:?})",
                        r.start, r.checkpoint, r.applied, r.failed, r.stop
                    ),
                    Ok(None) => println!("{scope}: no replication configured"),
                    Err(e) => println!("{scope}: {e}"),
                }
            }
        }

        Commands::Search {
            query,
            skip,
            limit,
            order_by,
            remote,
        } => {
            let scopes = query.scopes()?;
            let filter = query.filter()?;

            if let Some(text) = remote {
                let gateway = RemoteSearchGateway::new(
                    config_store.clone(),
                    index.clone(),
                    Arc::new(UpstreamClient::new(&config.upstream)?),
                    parser,
                );
                let event = RemoteRepositorySearchEvent {
                    storage_id: scopes[0].storage_id().to_string(),
                    repository_id: scopes[0].repository_id().to_string(),
                    filter: filter.clone(),
                    strict: query.strict,
                };
                // The process exits after printing, so a background fetch is awaited here.
                let size = limit.clamp(20, 250);
                if let Dispatch::Background(handle) = gateway.handle_search(&event, &text, size).await
                {
                    handle.await?;
                }
                store.persist().await?;
            }

            let entries = index
                .list_artifacts(
                    &scopes,
                    &filter,
                    Paging::new(skip, limit),
                    order_by.as_deref(),
                    query.strict,
                )
                .await?;
            for entry in &entries {
                let coordinates: Vec<String> = entry
                    .coordinates()
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                println!(
                    "{}/{}  {}  {}",
                    entry.storage_id,
                    entry.repository_id,
                    entry.path,
                    coordinates.join(" ")
                );
            }
            info!(results = entries.len(), "Search finished");
        }

        Commands::Count { query, distinct } => {
            let scopes = query.scopes()?;
            let filter = query.filter()?;
            let count = if distinct {
                index.count_coordinates(&scopes, &filter, query.strict).await?
            } else {
                index.count_artifacts(&scopes, &filter, query.strict).await?
            };
            println!("{count}");
        }

        Commands::Layout { repository } => {
            let scope = parse_scope(&repository)?;
            let repository = config_store
                .repository(scope.storage_id(), scope.repository_id())
                .await?
                .ok_or_else(|| anyhow!("repository {scope} is not configured"))?;
            let registry = LayoutProviderRegistry::default();
            let digests: Vec<String> = registry
                .digest_algorithms(&repository)?
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("{scope}: layout {} requires {}", repository.layout, digests.join(", "));
        }

        Commands::Checksums {
            repository,
            path,
            write,
        } => {
            let scope = parse_scope(&repository)?;
            let repository = config_store
                .repository(scope.storage_id(), scope.repository_id())
                .await?
                .ok_or_else(|| anyhow!("repository {scope} is not configured"))?;
            let root = config.storage_basedir(scope.storage_id()).join(&repository.id);
            let fs = LayoutProviderRegistry::default().file_system(
                &repository,
                root,
                Arc::new(LocalStorageProvider),
            )?;

            if write {
                for (algorithm, digest) in fs.write_checksums(&path).await? {
                    println!("{algorithm}  {digest}");
                }
            } else {
                let report = fs.verify_checksums(&path).await?;
                for (algorithm, status) in &report.results {
                    println!("{algorithm}  {status:?}");
                }
                if !report.is_valid() {
                    bail!("checksum verification failed for {path}");
                }
            }
        }
    }

    Ok(())
}
