use crate::types::{FeedError, PipelineConfig, PublishConfig, Result, SessionToken};
use crate::utils::validate_creator_id;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Load `.env` if present. Variables already set in the environment win.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }
}

impl PipelineConfig {
    /// Defaults overridden by `FEEDS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = var("FEEDS_CREATORS_FILE") {
            config.creators_file = PathBuf::from(path);
        }
        if let Some(dir) = var("FEEDS_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(url) = var("FEEDS_BASE_URL") {
            config.base_url = url;
        }
        if let Some(url) = var("FEEDS_PLATFORM_URL") {
            config.platform_url = url;
        }
        if let Some(suffix) = var("FEEDS_TITLE_SUFFIX") {
            config.feed_title_suffix = suffix;
        }
        if let Some(limit) = parsed_var("FEEDS_FETCH_LIMIT")? {
            config.fetch_limit = limit;
        }
        if let Some(workers) = parsed_var("FEEDS_CREATOR_CONCURRENCY")? {
            config.creator_concurrency = workers;
        }
        if let Some(workers) = parsed_var("FEEDS_CAPTURE_CONCURRENCY")? {
            config.capture_concurrency = workers;
        }
        if let Some(seconds) = parsed_var::<u64>("FEEDS_CREATOR_TIMEOUT_SECS")? {
            config.creator_timeout = Duration::from_secs(seconds);
        }
        if let Some(retries) = parsed_var("FEEDS_MAX_RETRIES")? {
            config.fetch.max_retries = retries;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_limit == 0 {
            return Err(FeedError::Configuration(
                "fetch limit must be at least 1".to_string(),
            ));
        }
        if self.creator_concurrency == 0 || self.capture_concurrency == 0 {
            return Err(FeedError::Configuration(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| FeedError::Configuration(format!("invalid base URL: {}", e)))?;
        Ok(())
    }
}

impl PublishConfig {
    /// `GCS_BUCKET_NAME` is required; `GOOGLE_APPLICATION_CREDENTIALS` is optional.
    pub fn from_env() -> Result<Self> {
        let bucket = var("GCS_BUCKET_NAME").ok_or_else(|| {
            FeedError::Configuration(
                "GCS bucket name not provided (set GCS_BUCKET_NAME)".to_string(),
            )
        })?;

        let mut config = Self::new(bucket);
        config.credentials_path = var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from);
        Ok(config)
    }
}

/// Session token from `FEEDS_SESSION_TOKEN` (or the legacy `MS_TOKEN`).
pub fn session_from_env() -> Result<SessionToken> {
    var("FEEDS_SESSION_TOKEN")
        .or_else(|| var("MS_TOKEN"))
        .map(SessionToken::new)
        .ok_or_else(|| {
            FeedError::Configuration(
                "session token not provided (set FEEDS_SESSION_TOKEN)".to_string(),
            )
        })
}

/// Read the creator list: one identifier per line, in processing order.
pub async fn read_creators(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        FeedError::Configuration(format!(
            "cannot read creator list {}: {}",
            path.display(),
            e
        ))
    })?;

    let creators = parse_creators(&content);
    if creators.is_empty() {
        return Err(FeedError::Configuration(format!(
            "creator list {} is empty",
            path.display()
        )));
    }
    Ok(creators)
}

/// Blank lines and `#` comments are ignored, as is anything after the first
/// comma. A leading `@` is dropped. Duplicates and invalid identifiers are
/// skipped with a warning.
pub fn parse_creators(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut creators = Vec::new();

    for line in content.lines() {
        let entry = line.split(',').next().unwrap_or("").trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let creator = entry.trim_start_matches('@');

        if let Err(e) = validate_creator_id(creator) {
            warn!("Skipping creator list entry: {}", e);
            continue;
        }
        if !seen.insert(creator.to_string()) {
            warn!("Skipping duplicate creator '{}'", creator);
            continue;
        }
        creators.push(creator.to_string());
    }

    creators
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| FeedError::Configuration(format!("{} is not valid: {:?}", name, raw))),
        None => Ok(None),
    }
}
