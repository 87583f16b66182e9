use crate::aggregator::Aggregator;
use crate::builder::{CreatorFeedBuilder, RunContext};
use crate::exporter::Exporter;
use crate::feed_store::FeedStore;
use crate::publisher::publish_store;
use crate::reporter::Reporter;
use crate::traits::{PostSource, Publisher};
use crate::types::{FeedError, PublishConfig, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Where a creator was when its run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CreatorStage {
    Fetching,
    Normalizing,
    Persisting,
}

impl fmt::Display for CreatorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CreatorStage::Fetching => "fetching",
            CreatorStage::Normalizing => "normalizing",
            CreatorStage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CreatorOutcome {
    Done { videos: usize },
    Failed { stage: CreatorStage, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatorResult {
    pub creator: String,
    pub outcome: CreatorOutcome,
}

impl CreatorResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, CreatorOutcome::Done { .. })
    }
}

/// Which post-barrier stages to run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub aggregate: bool,
    pub export: bool,
    pub report: bool,
    pub publish: Option<PublishConfig>,
}

impl RunOptions {
    pub fn all_stages() -> Self {
        Self {
            aggregate: true,
            export: true,
            report: true,
            publish: None,
        }
    }
}

/// Tally of one batch run. The batch succeeds once every creator was attempted;
/// derived stages that failed afterwards are listed in `stage_errors`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<CreatorResult>,
    pub total_users: Option<usize>,
    pub total_videos: Option<usize>,
    pub csv_rows: Option<usize>,
    pub published: Option<usize>,
    pub stage_errors: Vec<String>,
}

impl RunSummary {
    fn from_results(results: Vec<CreatorResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.succeeded()).count();
        Self {
            attempted: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
            ..Default::default()
        }
    }

    pub fn failed_creators(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.creator.as_str())
            .collect()
    }
}

/// Drives a batch: fetch, normalize and persist each creator, then the
/// derived datasets once every creator has finished.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    source: Arc<dyn PostSource>,
    store: Arc<FeedStore>,
    ctx: Arc<RunContext>,
    builder: Arc<CreatorFeedBuilder>,
    publisher: Option<Arc<dyn Publisher>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PipelineOrchestrator {
    pub fn new(source: Arc<dyn PostSource>, store: Arc<FeedStore>, ctx: Arc<RunContext>) -> Self {
        let builder = Arc::new(CreatorFeedBuilder::new(ctx.clone()));
        Self {
            source,
            store,
            ctx,
            builder,
            publisher: None,
            shutdown: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Creators still in flight when the flag flips to `true` are abandoned
    /// without writing; creators not yet started are reported as cancelled.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    pub async fn run(&self, creators: &[String], options: &RunOptions) -> Result<RunSummary> {
        if options.publish.is_some() && self.publisher.is_none() {
            return Err(FeedError::Configuration(
                "publishing requested without a publisher".to_string(),
            ));
        }

        info!(
            "Starting batch for {} creators from {}",
            creators.len(),
            self.source.source_name()
        );

        let results = self.run_creators(creators).await;
        let mut summary = RunSummary::from_results(results);

        info!(
            "Creators attempted: {}, succeeded: {}, failed: {}",
            summary.attempted, summary.succeeded, summary.failed
        );

        self.run_derived_stages(options, &mut summary).await;
        Ok(summary)
    }

    /// Runs creators on a pool of `creator_concurrency` workers. Returns once
    /// all of them have finished, failed or been cancelled; results keep
    /// input order.
    pub async fn run_creators(&self, creators: &[String]) -> Vec<CreatorResult> {
        let permits = Arc::new(Semaphore::new(self.ctx.config.creator_concurrency.max(1)));
        let mut workers = JoinSet::new();

        for (index, creator) in creators.iter().enumerate() {
            let this = self.clone();
            let permits = permits.clone();
            let creator = creator.clone();

            workers.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => this.process_guarded(&creator).await,
                    Err(_) => CreatorOutcome::Failed {
                        stage: CreatorStage::Fetching,
                        error: FeedError::Cancelled.to_string(),
                    },
                };
                (index, CreatorResult { creator, outcome })
            });
        }

        let mut results: Vec<Option<CreatorResult>> = vec![None; creators.len()];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Creator worker panicked: {}", e),
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.unwrap_or_else(|| CreatorResult {
                    creator: creators[index].clone(),
                    outcome: CreatorOutcome::Failed {
                        stage: CreatorStage::Fetching,
                        error: "worker aborted".to_string(),
                    },
                })
            })
            .collect()
    }

    /// One creator under the run's deadline and shutdown signal.
    async fn process_guarded(&self, creator: &str) -> CreatorOutcome {
        let (stage_tx, stage_rx) = watch::channel(CreatorStage::Fetching);
        let timeout = self.ctx.config.creator_timeout;

        if self.is_shut_down() {
            return failed(creator, CreatorStage::Fetching, FeedError::Cancelled);
        }

        let work = tokio::time::timeout(timeout, self.process_creator(creator, &stage_tx));
        let result = match self.shutdown.clone() {
            Some(mut shutdown) => {
                tokio::select! {
                    result = work => result,
                    _ = wait_for_shutdown(&mut shutdown) => Ok(Err(FeedError::Cancelled)),
                }
            }
            None => work.await,
        };

        let stage = *stage_rx.borrow();
        match result {
            Ok(Ok(videos)) => CreatorOutcome::Done { videos },
            Ok(Err(e)) => failed(creator, stage, e),
            Err(_) => failed(
                creator,
                stage,
                FeedError::Timeout {
                    seconds: timeout.as_secs(),
                },
            ),
        }
    }

    /// Fetching → Normalizing → Persisting. Nothing is written unless the
    /// build completed.
    pub async fn process_creator(
        &self,
        creator: &str,
        stage: &watch::Sender<CreatorStage>,
    ) -> Result<usize> {
        info!("Running for creator '{}'", creator);
        let config = &self.ctx.config;

        stage.send_replace(CreatorStage::Fetching);
        let raw_posts = self
            .source
            .posts(creator, &self.ctx.session, config.fetch_limit)
            .await?;

        stage.send_replace(CreatorStage::Normalizing);
        let (feed, document) = self.builder.build(creator, raw_posts).await?;

        stage.send_replace(CreatorStage::Persisting);
        let (json_path, rss_path) = self.store.persist(&feed, &document).await?;

        info!(
            "Generated RSS {} and JSON {}",
            rss_path.display(),
            json_path.display()
        );
        Ok(feed.video_count())
    }

    /// Each stage runs independently: a failure is logged, recorded in the
    /// summary and does not stop the stages after it.
    async fn run_derived_stages(&self, options: &RunOptions, summary: &mut RunSummary) {
        let config = &self.ctx.config;
        let needs_feeds = options.aggregate || options.export || options.report;

        let feeds = if needs_feeds {
            match self.store.list_all().await {
                Ok(feeds) => Some(feeds),
                Err(e) => {
                    stage_failed(summary, "listing artifacts", e);
                    None
                }
            }
        } else {
            None
        };

        if let Some(feeds) = feeds {
            if options.aggregate {
                let dataset = Aggregator::consolidate(feeds.clone());
                match Aggregator::write(&dataset, &config.consolidated_path()).await {
                    Ok(()) => {
                        summary.total_users = Some(dataset.total_users);
                        summary.total_videos = Some(dataset.total_videos);
                    }
                    Err(e) => stage_failed(summary, "aggregate", e),
                }
            }

            if options.export {
                let rows = Exporter::rows(&feeds);
                match Exporter::write(&rows, &config.csv_path()).await {
                    Ok(()) => summary.csv_rows = Some(rows.len()),
                    Err(e) => stage_failed(summary, "export", e),
                }
            }

            if options.report {
                let report = Reporter::summarize(&feeds);
                if let Err(e) = Reporter::write(&report, &config.report_path()).await {
                    stage_failed(summary, "report", e);
                }
            }
        }

        if let (Some(publish), Some(publisher)) = (&options.publish, &self.publisher) {
            match publish_store(publisher.as_ref(), &self.store, publish).await {
                Ok(published) => summary.published = Some(published.len()),
                Err(e) => stage_failed(summary, "publish", e),
            }
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender dropped without signalling; never resolve.
            std::future::pending::<()>().await;
        }
    }
}

fn stage_failed(summary: &mut RunSummary, stage: &str, e: FeedError) {
    error!("Stage {} failed: {}", stage, e);
    summary.stage_errors.push(format!("{}: {}", stage, e));
}

fn failed(creator: &str, stage: CreatorStage, e: FeedError) -> CreatorOutcome {
    match &e {
        FeedError::Cancelled | FeedError::Timeout { .. } => {
            warn!("Abandoned creator '{}' while {}: {}", creator, stage, e)
        }
        _ => error!("Error processing creator '{}' while {}: {}", creator, stage, e),
    }
    CreatorOutcome::Failed {
        stage,
        error: e.to_string(),
    }
}
