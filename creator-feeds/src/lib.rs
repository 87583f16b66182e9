pub mod types;
pub mod utils;
pub mod config;
pub mod traits;
pub mod fetcher;
pub mod capture;
pub mod thumbnail_cache;
pub mod syndication;
pub mod builder;
pub mod feed_store;
pub mod aggregator;
pub mod exporter;
pub mod reporter;
pub mod publisher;
pub mod pipeline;

pub use types::*;
pub use traits::{Capture, PostSource, Publisher, RawPostStream};
pub use fetcher::HttpPostSource;
pub use capture::{BrowserlessCapture, CapturePool};
pub use thumbnail_cache::ThumbnailCache;
pub use syndication::SyndicationDocument;
pub use builder::{CreatorFeedBuilder, RunContext};
pub use feed_store::{FeedStore, StoredFeed};
pub use aggregator::Aggregator;
pub use exporter::Exporter;
pub use reporter::Reporter;
pub use publisher::ObjectStorePublisher;
pub use pipeline::{CreatorOutcome, CreatorResult, CreatorStage, PipelineOrchestrator, RunOptions, RunSummary};
