//! Multi-source crawl run.
//!
//! One tokio task per seeded source, each owning its fetch session and a
//! child cancellation token. The reconciler runs only after every source
//! stream has completed: a join point, not a running merge.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::domain::ListingRecord;
use crate::infrastructure::config::{AppConfig, ConfigError};
use crate::infrastructure::fetcher::{FetchSession, FetchTransport};
use crate::infrastructure::identity::{Identity, IdentityPool};

use super::orchestrator::CrawlOrchestrator;
use super::reconciler;
use super::sources;
use super::stats::{RunReport, RunStats};

/// A configured crawl over every seeded source.
pub struct CrawlRun {
    config: AppConfig,
    cancel: CancellationToken,
    transport: Option<Arc<dyn FetchTransport>>,
}

impl CrawlRun {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            transport: None,
        }
    }

    /// Use an externally-owned cancellation token (signal handling).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Route every session through one explicit transport (proxied
    /// deployments, tests).
    pub fn with_transport(mut self, transport: Arc<dyn FetchTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Run all sources to completion and reconcile their streams.
    ///
    /// Configuration problems (invalid settings, an unknown source name)
    /// are the only fatal errors, and all of them surface before the first
    /// fetch.
    pub async fn execute(self) -> Result<RunReport, ConfigError> {
        self.config.validate()?;

        // Resolve every seed up front: refuse to run on a bad seed list
        // instead of failing halfway through a crawl.
        let mut resolved = Vec::new();
        for seed in &self.config.seeds {
            resolved.push((sources::resolve(&seed.source)?, seed.clone()));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        // Configured identities when present, built-in pool otherwise.
        let identities = IdentityPool::new(
            self.config
                .identities
                .iter()
                .map(|entry| Identity {
                    user_agent: entry.user_agent.clone(),
                    accept: entry.accept.clone(),
                    accept_language: entry.accept_language.clone(),
                    referer: entry.referer.clone(),
                })
                .collect(),
        );

        let mut tasks = Vec::new();
        for (spec, seed) in resolved {
            let source_name = spec.name.clone();
            let session = match &self.transport {
                Some(transport) => FetchSession::with_transport(
                    self.config.fetch.clone(),
                    identities.clone(),
                    self.cancel.child_token(),
                    transport.clone(),
                ),
                None => FetchSession::new(
                    self.config.fetch.clone(),
                    identities.clone(),
                    self.cancel.child_token(),
                )
                .map_err(|e| ConfigError::Invalid {
                    reason: format!("failed to build HTTP client: {e}"),
                })?,
            };

            let orchestrator = CrawlOrchestrator::new(
                spec,
                self.config.crawl.clone(),
                self.config.pagination.clone(),
                seed.filters.clone(),
                session,
            );

            let (tx, rx) = mpsc::channel::<ListingRecord>(64);
            let stats_task = tokio::spawn(orchestrator.run(seed.region_hint.clone(), tx));
            let stream_task =
                tokio::spawn(async move { ReceiverStream::new(rx).collect::<Vec<_>>().await });
            tasks.push((source_name, stats_task, stream_task));
        }

        let mut streams = Vec::new();
        let mut source_stats = Vec::new();
        for (source_name, stats_task, stream_task) in tasks {
            match stats_task.await {
                Ok(stats) => source_stats.push(stats),
                Err(e) => {
                    warn!(source = %source_name, "Source task aborted: {e}");
                    source_stats.push(RunStats::new(source_name));
                }
            }
            streams.push(stream_task.await.unwrap_or_default());
        }

        let records = reconciler::merge(streams);
        if records.is_empty() {
            warn!("Run completed with zero records");
        }

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            records,
            source_stats,
        })
    }
}
