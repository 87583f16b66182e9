use crate::types::{FeedError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Write `data` to `path` so that readers see either the old file or the new one.
///
/// The bytes go to a uniquely named sibling first and are renamed into place
/// once synced. The temporary file is removed if any step fails.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = stage_file(path, data).await?;

    if let Err(source) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(persistence(path, source));
    }

    debug!("Wrote {} ({} bytes)", path.display(), data.len());
    Ok(())
}

/// Write and sync `data` to a fresh temp sibling of `path`, returning the
/// sibling. Nothing is visible at `path` until the caller renames it.
pub async fn stage_file(path: &Path, data: &[u8]) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|source| persistence(parent, source))?;

    let tmp = temp_sibling(path);
    if let Err(source) = write_and_sync(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(persistence(path, source));
    }
    Ok(tmp)
}

async fn write_and_sync(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// `.name.<uuid>.tmp` next to `path`.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
}

/// The target file name `file_name` is a temp sibling of, if it is one.
pub fn temp_target(file_name: &str) -> Option<&str> {
    let inner = file_name.strip_prefix('.')?.strip_suffix(".tmp")?;
    let (target, id) = inner.rsplit_once('.')?;
    Uuid::parse_str(id).ok()?;
    (!target.is_empty()).then_some(target)
}

/// Remove temp siblings of `path` left behind by interrupted writes.
/// Returns how many were removed.
pub async fn sweep_temp_siblings(path: &Path) -> Result<usize> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Ok(0);
    };
    if !fs::try_exists(parent).await? {
        return Ok(0);
    }
    let name = name.to_string_lossy();

    let mut removed = 0;
    let mut entries = fs::read_dir(parent).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        if temp_target(&file_name.to_string_lossy()) == Some(&*name) {
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove stale {}: {}", entry.path().display(), e),
            }
        }
    }

    if removed > 0 {
        debug!("Removed {} stale temp files for {}", removed, path.display());
    }
    Ok(removed)
}

pub fn persistence(path: &Path, source: std::io::Error) -> FeedError {
    FeedError::PersistenceFailure {
        path: path.to_path_buf(),
        source,
    }
}

/// Canonical timestamp form used for every `created_time`: `2024-01-01T00:00:00Z`.
///
/// Fixed width and zero padded, so string order equals chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Unix seconds to UTC. Out-of-range values are treated as malformed.
pub fn timestamp_from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

/// Collapse embedded line breaks to single spaces for tabular output.
pub fn collapse_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Creator identifiers become directory and file names, so reject anything
/// that could escape the output tree.
pub fn validate_creator_id(creator: &str) -> Result<()> {
    let invalid = creator.is_empty()
        || creator == "."
        || creator.contains("..")
        || creator.contains(['/', '\\', '\0'])
        || creator.chars().any(char::is_whitespace);

    if invalid {
        return Err(FeedError::InvalidCreator(creator.to_string()));
    }
    Ok(())
}
