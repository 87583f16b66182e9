use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use creator_feeds::config::{load_dotenv, read_creators, session_from_env};
use creator_feeds::pipeline::RunOptions;
use creator_feeds::publisher::publish_store;
use creator_feeds::syndication::convert_all;
use creator_feeds::{
    Aggregator, BrowserlessCapture, CapturePool, Exporter, FeedStore, HttpPostSource,
    ObjectStorePublisher, PipelineConfig, PipelineOrchestrator, PublishConfig, Reporter,
    RunContext, ThumbnailCache,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "creator-feeds", about = "Per-creator RSS/JSON feeds and consolidated datasets")]
struct Cli {
    /// Root for json/, rss/, thumbnails/ and derived datasets
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every listed creator, then run the requested stages
    Run(RunArgs),
    /// Rebuild JSON artifacts from RSS documents
    Convert,
    /// Write the consolidated JSON dataset
    Consolidate,
    /// Write the CSV export
    Csv,
    /// Write the summary report
    Report,
    /// Consolidate, export and report
    All,
    /// Upload JSON artifacts and the index manifest
    Publish(PublishArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Creator list, one identifier per line
    #[arg(long)]
    creators: Option<PathBuf>,

    /// Platform API base
    #[arg(long, env = "FEEDS_SOURCE_URL")]
    source_url: String,

    /// Browserless endpoint used for thumbnail screenshots
    #[arg(long, env = "BROWSERLESS_URL")]
    browserless_url: String,

    #[arg(long, env = "BROWSERLESS_TOKEN", hide_env_values = true)]
    browserless_token: Option<String>,

    #[arg(long)]
    aggregate: bool,

    #[arg(long)]
    export: bool,

    #[arg(long)]
    report: bool,

    /// Shorthand for --aggregate --export --report
    #[arg(long)]
    all_stages: bool,

    /// Upload to the configured bucket after the other stages
    #[arg(long)]
    publish: bool,
}

#[derive(Args)]
struct PublishArgs {
    /// Overrides GCS_BUCKET_NAME
    #[arg(long)]
    bucket: Option<String>,

    /// Overrides GOOGLE_APPLICATION_CREDENTIALS
    #[arg(long)]
    credentials: Option<PathBuf>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    let store = FeedStore::new(config.json_dir(), config.rss_dir());

    match cli.command {
        Command::Run(args) => run_batch(config, store, args).await?,
        Command::Convert => {
            convert_all(&store, &config.feed_title_suffix).await?;
        }
        Command::Consolidate => {
            let dataset = Aggregator::aggregate(&store).await?;
            Aggregator::write(&dataset, &config.consolidated_path()).await?;
        }
        Command::Csv => {
            let rows = Exporter::export(&store).await?;
            Exporter::write(&rows, &config.csv_path()).await?;
        }
        Command::Report => {
            let report = Reporter::report(&store).await?;
            Reporter::write(&report, &config.report_path()).await?;
        }
        Command::All => {
            info!("Running all dataset operations");
            let feeds = store.list_all().await?;
            let dataset = Aggregator::consolidate(feeds.clone());
            Aggregator::write(&dataset, &config.consolidated_path()).await?;
            Exporter::write(&Exporter::rows(&feeds), &config.csv_path()).await?;
            Reporter::write(&Reporter::summarize(&feeds), &config.report_path()).await?;
            info!("All operations completed");
        }
        Command::Publish(args) => {
            let publish = publish_config(args.bucket, args.credentials)?;
            let publisher = ObjectStorePublisher::gcs(&publish)?;
            let published = publish_store(&publisher, &store, &publish).await?;
            if published.is_empty() {
                anyhow::bail!("no files were uploaded");
            }
        }
    }

    Ok(())
}

fn publish_config(
    bucket: Option<String>,
    credentials: Option<PathBuf>,
) -> anyhow::Result<PublishConfig> {
    let mut publish = match bucket {
        Some(bucket) => PublishConfig::new(bucket),
        None => PublishConfig::from_env()?,
    };
    if credentials.is_some() {
        publish.credentials_path = credentials;
    }
    Ok(publish)
}

async fn run_batch(mut config: PipelineConfig, store: FeedStore, args: RunArgs) -> anyhow::Result<()> {
    if let Some(creators) = args.creators {
        config.creators_file = creators;
    }

    // Everything that can be missing is checked before the first creator.
    let creators = read_creators(&config.creators_file).await?;
    let session = session_from_env()?;
    let publish = if args.publish {
        Some(publish_config(None, None)?)
    } else {
        None
    };

    let source = HttpPostSource::new(&args.source_url, config.fetch.clone())
        .context("building platform client")?;
    let browserless = BrowserlessCapture::new(&args.browserless_url, args.browserless_token.as_deref())
        .context("building capture client")?;
    let capture = CapturePool::new(Arc::new(browserless), config.capture_concurrency);
    let cache = ThumbnailCache::new(
        config.thumbnails_dir(),
        &config.public_url("thumbnails"),
        Arc::new(capture),
    );

    let options = RunOptions {
        aggregate: args.aggregate || args.all_stages,
        export: args.export || args.all_stages,
        report: args.report || args.all_stages,
        publish: publish.clone(),
    };

    let ctx = Arc::new(RunContext::new(session, config, cache));
    let mut orchestrator = PipelineOrchestrator::new(Arc::new(source), Arc::new(store), ctx);
    if let Some(ref publish) = publish {
        orchestrator = orchestrator.with_publisher(Arc::new(ObjectStorePublisher::gcs(publish)?));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, abandoning in-flight creators");
            let _ = shutdown_tx.send(true);
        }
    });
    let orchestrator = orchestrator.with_shutdown(shutdown_rx);

    let summary = orchestrator.run(&creators, &options).await?;

    info!(
        "Batch finished: {} attempted, {} succeeded, {} failed",
        summary.attempted, summary.succeeded, summary.failed
    );
    for creator in summary.failed_creators() {
        error!("Creator '{}' failed this run", creator);
    }
    for stage_error in &summary.stage_errors {
        error!("Derived stage failed: {}", stage_error);
    }
    if !summary.stage_errors.is_empty() {
        anyhow::bail!("{} derived stages failed", summary.stage_errors.len());
    }
    Ok(())
}
