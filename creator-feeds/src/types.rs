use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Title used when the platform gives a post no caption.
pub const DEFAULT_TITLE_PLACEHOLDER: &str = "No Title";

/// Syndication body used when a post has no caption.
pub const DEFAULT_DESCRIPTION_PLACEHOLDER: &str = "No Description";

/// Engagement counters for a single post. Missing counters default to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStats {
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub shares: u64,
}

/// One normalized post as stored in a creator's JSON artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Canonical `YYYY-MM-DDTHH:MM:SSZ`, absent when the source timestamp was malformed.
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub stats: PostStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub retrieved_at: DateTime<Utc>,
}

/// A creator's full snapshot. Rebuilt from scratch on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorFeed {
    pub user: String,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    #[serde(default)]
    pub videos: Vec<PostRecord>,
}

impl CreatorFeed {
    pub fn video_count(&self) -> usize {
        self.videos.len()
    }
}

/// Raw post as yielded by the platform. Every field the platform may omit is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPost {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub desc: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub create_time: Option<i64>,
    #[serde(default)]
    pub video: RawVideo,
    #[serde(default)]
    pub stats: RawStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVideo {
    #[serde(default)]
    pub cover: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStats {
    #[serde(default)]
    pub play_count: Option<u64>,
    #[serde(default)]
    pub digg_count: Option<u64>,
    #[serde(default)]
    pub comment_count: Option<u64>,
    #[serde(default)]
    pub share_count: Option<u64>,
}

impl From<&RawStats> for PostStats {
    fn from(raw: &RawStats) -> Self {
        Self {
            views: raw.play_count.unwrap_or(0),
            likes: raw.digg_count.unwrap_or(0),
            comments: raw.comment_count.unwrap_or(0),
            shares: raw.share_count.unwrap_or(0),
        }
    }
}

/// Opaque platform session token. Never printed.
#[derive(Clone, Default)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(***)")
    }
}

/// Every readable creator artifact merged into one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedDataset {
    pub generated_at: DateTime<Utc>,
    pub total_users: usize,
    pub total_videos: usize,
    pub users: Vec<CreatorFeed>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorSummary {
    pub video_count: usize,
    pub total_views: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub total_shares: u64,
    pub latest_video: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub users: usize,
    pub videos: usize,
    pub total_views: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub total_shares: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub generated_at: DateTime<Utc>,
    pub users: BTreeMap<String, CreatorSummary>,
    pub totals: ReportTotals,
}

/// One CSV line. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvRow {
    pub user: String,
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub created_time: String,
    pub thumbnail_url: String,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

/// Remote manifest written after a publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub generated_at: DateTime<Utc>,
    pub total_files: usize,
    pub files: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub user: String,
    pub filename: String,
    pub remote_path: String,
    pub video_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub size: u64,
}

/// A local artifact that reached the object store.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedArtifact {
    pub local_path: PathBuf,
    pub remote_key: String,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Creator-Feeds/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub creators_file: PathBuf,
    /// Holds `json/`, `rss/`, `thumbnails/` and the derived datasets.
    pub output_dir: PathBuf,
    /// Public location the output directory is served from.
    pub base_url: String,
    /// Prefix for canonical post links, e.g. `https://www.tiktok.com`.
    pub platform_url: String,
    pub feed_title_suffix: String,
    pub title_placeholder: String,
    pub fetch_limit: usize,
    pub creator_concurrency: usize,
    pub capture_concurrency: usize,
    pub creator_timeout: Duration,
    pub fetch: FetchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            creators_file: PathBuf::from("creators.txt"),
            output_dir: PathBuf::from("."),
            base_url: "http://localhost:8000/".to_string(),
            platform_url: "https://www.tiktok.com".to_string(),
            feed_title_suffix: " TikTok".to_string(),
            title_placeholder: DEFAULT_TITLE_PLACEHOLDER.to_string(),
            fetch_limit: 10,
            creator_concurrency: 1,
            capture_concurrency: 2,
            creator_timeout: Duration::from_secs(300),
            fetch: FetchConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn json_dir(&self) -> PathBuf {
        self.output_dir.join("json")
    }

    pub fn rss_dir(&self) -> PathBuf {
        self.output_dir.join("rss")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.output_dir.join("thumbnails")
    }

    pub fn consolidated_path(&self) -> PathBuf {
        self.output_dir.join("feeds_consolidated.json")
    }

    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join("feeds_posts.csv")
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("feeds_summary_report.json")
    }

    /// `base_url` joined with a relative path, with exactly one slash between them.
    pub fn public_url(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub bucket: String,
    pub credentials_path: Option<PathBuf>,
    pub json_prefix: String,
    pub index_key: String,
}

impl PublishConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            credentials_path: None,
            json_prefix: "tiktok-data/json/".to_string(),
            index_key: "tiktok-data/index.json".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Source unavailable for {creator}: {message}")]
    SourceUnavailable { creator: String, message: String },

    #[error("Thumbnail capture failed for {url}: {message}")]
    CaptureFailure { url: String, message: String },

    #[error("Corrupt artifact {path}: {message}")]
    CorruptArtifact { path: PathBuf, message: String },

    #[error("Failed to persist {path}: {source}")]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid creator identifier: {0:?}")]
    InvalidCreator(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Publish failed for {key}: {message}")]
    Publish { key: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, FeedError>;
