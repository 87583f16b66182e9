mod common;

use common::{context, init_tracing, raw_post, test_config, CountingCapture, Scripted, StaticPostSource, MIRROR_BASE};
use creator_feeds::pipeline::{CreatorOutcome, CreatorStage, RunOptions};
use creator_feeds::types::*;
use creator_feeds::{
    FeedStore, ObjectStorePublisher, PipelineOrchestrator, Publisher, RunContext, ThumbnailCache,
};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, ObjectStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const JAN: i64 = 1_704_067_200;

fn names(creators: &[&str]) -> Vec<String> {
    creators.iter().map(|c| c.to_string()).collect()
}

fn orchestrator(root: &Path, source: StaticPostSource) -> PipelineOrchestrator {
    let ctx = context(root, Arc::new(CountingCapture::default()));
    PipelineOrchestrator::new(Arc::new(source), Arc::new(FeedStore::under(root)), ctx)
}

fn orchestrator_with(root: &Path, source: StaticPostSource, config: PipelineConfig) -> PipelineOrchestrator {
    let cache = ThumbnailCache::new(
        config.thumbnails_dir(),
        MIRROR_BASE,
        Arc::new(CountingCapture::default()),
    );
    let ctx = Arc::new(RunContext::new(SessionToken::new("test-token"), config, cache));
    PipelineOrchestrator::new(Arc::new(source), Arc::new(FeedStore::under(root)), ctx)
}

fn posts(prefix: &str, count: i64) -> Vec<RawPost> {
    (0..count)
        .map(|i| raw_post(&format!("{}{}", prefix, i), JAN + i, 10))
        .collect()
}

#[tokio::test]
async fn test_failing_creator_does_not_stop_the_batch() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = StaticPostSource::default()
        .with("alice", Scripted::Posts(posts("a", 2)))
        .with("bob", Scripted::Unavailable)
        .with("carol", Scripted::Posts(posts("c", 3)));
    let pipeline = orchestrator(dir.path(), source);

    let summary = pipeline
        .run(&names(&["alice", "bob", "carol"]), &RunOptions::default())
        .await?;

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_creators(), vec!["bob"]);
    assert!(matches!(
        summary.results[1].outcome,
        CreatorOutcome::Failed {
            stage: CreatorStage::Fetching,
            ..
        }
    ));
    assert_eq!(summary.results[2].outcome, CreatorOutcome::Done { videos: 3 });

    let store = pipeline.store();
    assert!(store.feed_path("alice").exists());
    assert!(store.syndication_path("carol").exists());
    assert!(!store.feed_path("bob").exists());
    assert!(!store.syndication_path("bob").exists());
    Ok(())
}

#[tokio::test]
async fn test_broken_stream_keeps_previous_artifact() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let first = orchestrator(
        dir.path(),
        StaticPostSource::default().with("alice", Scripted::Posts(posts("old", 2))),
    );
    first.run(&names(&["alice"]), &RunOptions::default()).await?;
    let before = first.store().load("alice").await?;

    let second = orchestrator(
        dir.path(),
        StaticPostSource::default().with("alice", Scripted::BreaksAfter(posts("new", 1))),
    );
    let summary = second.run(&names(&["alice"]), &RunOptions::default()).await?;

    assert_eq!(summary.failed, 1);
    assert!(matches!(
        summary.results[0].outcome,
        CreatorOutcome::Failed {
            stage: CreatorStage::Normalizing,
            ..
        }
    ));
    assert_eq!(second.store().load("alice").await?, before);
    Ok(())
}

#[tokio::test]
async fn test_hanging_creator_times_out() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = test_config(dir.path());
    config.creator_timeout = Duration::from_millis(200);

    let source = StaticPostSource::default()
        .with("stuck", Scripted::Hangs)
        .with("alice", Scripted::Posts(posts("a", 1)));
    let pipeline = orchestrator_with(dir.path(), source, config);

    let summary = pipeline
        .run(&names(&["stuck", "alice"]), &RunOptions::default())
        .await?;

    match &summary.results[0].outcome {
        CreatorOutcome::Failed { stage, error } => {
            assert_eq!(*stage, CreatorStage::Fetching);
            assert!(error.contains("Timed out"), "unexpected error: {}", error);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(summary.results[1].succeeded());
    assert!(!pipeline.store().feed_path("stuck").exists());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_abandons_remaining_creators() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let source = StaticPostSource::default()
        .with("stuck", Scripted::Hangs)
        .with("alice", Scripted::Posts(posts("a", 1)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline = orchestrator(dir.path(), source).with_shutdown(shutdown_rx);

    let creators = names(&["stuck", "alice"]);
    let run = tokio::spawn(async move { pipeline.run(&creators, &RunOptions::default()).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).map_err(|_| FeedError::Cancelled)?;

    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .map_err(|_| FeedError::Timeout { seconds: 5 })?
        .map_err(|e| FeedError::Parse(e.to_string()))??;

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 0);
    for result in &summary.results {
        match &result.outcome {
            CreatorOutcome::Failed { error, .. } => assert_eq!(error, "Cancelled"),
            other => panic!("{} should be cancelled, got {:?}", result.creator, other),
        }
    }
    assert!(!dir.path().join("json/alice.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_results_keep_input_order_with_parallel_workers() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = test_config(dir.path());
    config.creator_concurrency = 4;

    let creators: Vec<String> = (0..8).map(|i| format!("creator{}", i)).collect();
    let source = creators.iter().fold(StaticPostSource::default(), |source, c| {
        source.with(c, Scripted::Posts(posts(c, 2)))
    });
    let pipeline = orchestrator_with(dir.path(), source, config);

    let summary = pipeline.run(&creators, &RunOptions::default()).await?;

    let order: Vec<&str> = summary.results.iter().map(|r| r.creator.as_str()).collect();
    assert_eq!(order, creators.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(summary.succeeded, 8);
    Ok(())
}

#[tokio::test]
async fn test_derived_stages_run_after_all_creators() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = StaticPostSource::default()
        .with("alice", Scripted::Posts(posts("a", 2)))
        .with("bob", Scripted::Unavailable)
        .with("carol", Scripted::Posts(posts("c", 3)));
    let pipeline = orchestrator(dir.path(), source);

    let summary = pipeline
        .run(&names(&["alice", "bob", "carol"]), &RunOptions::all_stages())
        .await?;

    assert_eq!(summary.total_users, Some(2));
    assert_eq!(summary.total_videos, Some(5));
    assert_eq!(summary.csv_rows, Some(5));
    assert_eq!(summary.published, None);

    let config = test_config(dir.path());
    let dataset: ConsolidatedDataset =
        serde_json::from_str(&tokio::fs::read_to_string(config.consolidated_path()).await?)?;
    assert_eq!(dataset.total_videos, 5);

    let report: SummaryReport =
        serde_json::from_str(&tokio::fs::read_to_string(config.report_path()).await?)?;
    assert_eq!(report.totals.total_views, 50);
    assert!(config.csv_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_publish_uploads_artifacts_and_index() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let bucket = Arc::new(InMemory::new());
    let source = StaticPostSource::default()
        .with("alice", Scripted::Posts(posts("a", 2)))
        .with("bob", Scripted::Posts(posts("b", 1)));
    let pipeline = orchestrator(dir.path(), source)
        .with_publisher(Arc::new(ObjectStorePublisher::new(bucket.clone(), "memory")));

    let options = RunOptions {
        publish: Some(PublishConfig::new("test-bucket")),
        ..Default::default()
    };
    let summary = pipeline.run(&names(&["alice", "bob"]), &options).await?;
    assert_eq!(summary.published, Some(2));

    let uploaded = bucket
        .get_opts(&ObjectPath::from("tiktok-data/json/alice.json"), GetOptions::default())
        .await?
        .bytes()
        .await?;
    let feed: CreatorFeed = serde_json::from_slice(&uploaded)?;
    assert_eq!(feed.video_count(), 2);

    let index = bucket
        .get_opts(&ObjectPath::from("tiktok-data/index.json"), GetOptions::default())
        .await?
        .bytes()
        .await?;
    let manifest: IndexManifest = serde_json::from_slice(&index)?;
    assert_eq!(manifest.total_files, 2);
    assert_eq!(manifest.files[0].user, "alice");
    assert_eq!(manifest.files[0].filename, "alice.json");
    assert_eq!(manifest.files[0].remote_path, "tiktok-data/json/alice.json");
    assert_eq!(manifest.files[0].video_count, 2);
    assert!(manifest.files[0].last_updated.is_some());
    assert_eq!(manifest.files[1].video_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_publish_without_publisher_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pipeline = orchestrator(
        dir.path(),
        StaticPostSource::default().with("alice", Scripted::Posts(posts("a", 1))),
    );
    let options = RunOptions {
        publish: Some(PublishConfig::new("test-bucket")),
        ..Default::default()
    };

    let result = pipeline.run(&names(&["alice"]), &options).await;

    assert!(matches!(result, Err(FeedError::Configuration(_))));
    assert!(!pipeline.store().feed_path("alice").exists());
    Ok(())
}

#[tokio::test]
async fn test_publish_with_nothing_to_upload_skips_index() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bucket = Arc::new(InMemory::new());
    let pipeline = orchestrator(
        dir.path(),
        StaticPostSource::default().with("bob", Scripted::Unavailable),
    )
    .with_publisher(Arc::new(ObjectStorePublisher::new(bucket.clone(), "memory")));
    let options = RunOptions {
        publish: Some(PublishConfig::new("test-bucket")),
        ..Default::default()
    };

    let summary = pipeline.run(&names(&["bob"]), &options).await?;

    assert_eq!(summary.published, Some(0));
    let index = bucket
        .get_opts(&ObjectPath::from("tiktok-data/index.json"), GetOptions::default())
        .await;
    assert!(matches!(index, Err(object_store::Error::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn test_every_succeeded_creator_reaches_the_aggregate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = StaticPostSource::default()
        .with(".dotty", Scripted::Posts(posts("d", 2)))
        .with("alice", Scripted::Posts(posts("a", 1)));
    let pipeline = orchestrator(dir.path(), source);

    let summary = pipeline
        .run(&names(&[".dotty", "alice"]), &RunOptions::all_stages())
        .await?;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.total_users, Some(summary.succeeded));
    assert_eq!(summary.total_videos, Some(3));
    assert_eq!(summary.csv_rows, Some(3));
    Ok(())
}

#[tokio::test]
async fn test_failed_derived_stage_keeps_the_tally() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path());

    // A non-empty directory where the consolidated file should go.
    let blocked = config.consolidated_path();
    tokio::fs::create_dir_all(&blocked).await?;
    tokio::fs::write(blocked.join("keep"), "x").await?;

    let source = StaticPostSource::default()
        .with("alice", Scripted::Posts(posts("a", 2)))
        .with("bob", Scripted::Unavailable);
    let pipeline = orchestrator(dir.path(), source);

    let summary = pipeline
        .run(&names(&["alice", "bob"]), &RunOptions::all_stages())
        .await?;

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.stage_errors.len(), 1);
    assert!(summary.stage_errors[0].starts_with("aggregate"));
    assert_eq!(summary.total_users, None);

    assert_eq!(summary.csv_rows, Some(2));
    assert!(config.csv_path().exists());
    assert!(config.report_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_failed_publish_keeps_the_tally() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = StaticPostSource::default().with("alice", Scripted::Posts(posts("a", 1)));
    let pipeline = orchestrator(dir.path(), source).with_publisher(Arc::new(FailingPublisher));
    let options = RunOptions {
        publish: Some(PublishConfig::new("test-bucket")),
        ..RunOptions::all_stages()
    };

    let summary = pipeline.run(&names(&["alice"]), &options).await?;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.total_users, Some(1));
    assert_eq!(summary.published, None);
    assert_eq!(summary.stage_errors.len(), 1);
    assert!(summary.stage_errors[0].starts_with("publish"));
    Ok(())
}

/// Uploads succeed; the index write does not.
struct FailingPublisher;

#[async_trait::async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, _local_path: &Path, _remote_key: &str) -> Result<()> {
        Ok(())
    }

    async fn create_index(&self, _published: &[PublishedArtifact], index_key: &str) -> Result<()> {
        Err(FeedError::Publish {
            key: index_key.to_string(),
            message: "bucket is read-only".to_string(),
        })
    }
}
