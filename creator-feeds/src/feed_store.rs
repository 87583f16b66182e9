use crate::syndication::SyndicationDocument;
use crate::types::{CreatorFeed, FeedError, Result};
use crate::utils::{
    persistence, stage_file, sweep_temp_siblings, temp_target, validate_creator_id, write_atomic,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// A readable JSON artifact together with where it lives.
#[derive(Debug, Clone)]
pub struct StoredFeed {
    pub path: PathBuf,
    pub feed: CreatorFeed,
}

/// Durable per-creator artifacts: `json/<creator>.json` and `rss/<creator>.xml`.
///
/// Every write replaces the previous artifact whole. Listing is sorted by
/// file name so derived datasets come out in a stable order. Only temp files
/// are skipped; dot-prefixed creator files are listed.
pub struct FeedStore {
    json_dir: PathBuf,
    rss_dir: PathBuf,
}

impl FeedStore {
    pub fn new(json_dir: impl Into<PathBuf>, rss_dir: impl Into<PathBuf>) -> Self {
        Self {
            json_dir: json_dir.into(),
            rss_dir: rss_dir.into(),
        }
    }

    /// Store rooted at `root/json` and `root/rss`.
    pub fn under(root: &Path) -> Self {
        Self::new(root.join("json"), root.join("rss"))
    }

    pub fn json_dir(&self) -> &Path {
        &self.json_dir
    }

    pub fn rss_dir(&self) -> &Path {
        &self.rss_dir
    }

    pub fn feed_path(&self, creator: &str) -> PathBuf {
        self.json_dir.join(format!("{}.json", creator))
    }

    pub fn syndication_path(&self, creator: &str) -> PathBuf {
        self.rss_dir.join(format!("{}.xml", creator))
    }

    pub async fn save_feed(&self, feed: &CreatorFeed) -> Result<PathBuf> {
        validate_creator_id(&feed.user)?;
        let path = self.feed_path(&feed.user);
        write_atomic(&path, &serde_json::to_vec_pretty(feed)?).await?;
        Ok(path)
    }

    pub async fn save_syndication(&self, document: &SyndicationDocument) -> Result<PathBuf> {
        validate_creator_id(&document.user)?;
        let path = self.syndication_path(&document.user);
        write_atomic(&path, document.to_xml().as_bytes()).await?;
        Ok(path)
    }

    /// Write both artifacts for one creator.
    ///
    /// Both are staged (written and synced) before either is renamed, so a
    /// failed write leaves the previous pair in place. The two renames run on
    /// their own task: once started they complete even if the caller is
    /// cancelled, so the JSON and the XML always come from the same build.
    /// Temp files orphaned by an earlier interrupted run are swept first.
    pub async fn persist(
        &self,
        feed: &CreatorFeed,
        document: &SyndicationDocument,
    ) -> Result<(PathBuf, PathBuf)> {
        validate_creator_id(&feed.user)?;
        let json_path = self.feed_path(&feed.user);
        let rss_path = self.syndication_path(&document.user);
        let json = serde_json::to_vec_pretty(feed)?;
        let xml = document.to_xml();

        for path in [&json_path, &rss_path] {
            if let Err(e) = sweep_temp_siblings(path).await {
                warn!("Could not sweep temp files for {}: {}", path.display(), e);
            }
        }

        let staged_json = stage_file(&json_path, &json).await?;
        let staged_rss = match stage_file(&rss_path, xml.as_bytes()).await {
            Ok(p) => p,
            Err(e) => {
                let _ = fs::remove_file(&staged_json).await;
                return Err(e);
            }
        };

        let commit = tokio::spawn(commit_pair(
            (staged_rss, rss_path.clone()),
            (staged_json, json_path.clone()),
        ));
        match commit.await {
            Ok(result) => result?,
            Err(e) => {
                return Err(persistence(
                    &json_path,
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                ))
            }
        }

        info!(
            "Persisted {} and {}",
            json_path.display(),
            rss_path.display()
        );
        Ok((json_path, rss_path))
    }

    pub async fn load(&self, creator: &str) -> Result<CreatorFeed> {
        validate_creator_id(creator)?;
        let path = self.feed_path(creator);
        if !fs::try_exists(&path).await? {
            return Err(FeedError::NotFound(creator.to_string()));
        }
        read_feed(&path).await
    }

    /// Every JSON artifact path, sorted by file name.
    pub async fn artifact_paths(&self) -> Result<Vec<PathBuf>> {
        list_with_extension(&self.json_dir, "json").await
    }

    pub async fn syndication_paths(&self) -> Result<Vec<PathBuf>> {
        list_with_extension(&self.rss_dir, "xml").await
    }

    /// Every readable artifact. Unreadable or malformed files are logged and skipped.
    pub async fn list_stored(&self) -> Result<Vec<StoredFeed>> {
        let mut stored = Vec::new();
        for path in self.artifact_paths().await? {
            match read_feed(&path).await {
                Ok(feed) => stored.push(StoredFeed { path, feed }),
                Err(e) => warn!("Skipping unreadable artifact {}: {}", path.display(), e),
            }
        }
        Ok(stored)
    }

    pub async fn list_all(&self) -> Result<Vec<CreatorFeed>> {
        Ok(self
            .list_stored()
            .await?
            .into_iter()
            .map(|s| s.feed)
            .collect())
    }
}

/// Rename `first` then `second` into place. If `first` fails neither moves.
async fn commit_pair(first: (PathBuf, PathBuf), second: (PathBuf, PathBuf)) -> Result<()> {
    let (first_tmp, first_path) = first;
    let (second_tmp, second_path) = second;

    if let Err(source) = fs::rename(&first_tmp, &first_path).await {
        let _ = fs::remove_file(&first_tmp).await;
        let _ = fs::remove_file(&second_tmp).await;
        return Err(persistence(&first_path, source));
    }
    if let Err(source) = fs::rename(&second_tmp, &second_path).await {
        let _ = fs::remove_file(&second_tmp).await;
        return Err(persistence(&second_path, source));
    }
    Ok(())
}

async fn read_feed(path: &Path) -> Result<CreatorFeed> {
    let bytes = fs::read(path).await.map_err(|e| FeedError::CorruptArtifact {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| FeedError::CorruptArtifact {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

async fn list_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !fs::try_exists(dir).await? {
        debug!("Store directory {} does not exist yet", dir.display());
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let temp = path
            .file_name()
            .map(|n| temp_target(&n.to_string_lossy()).is_some())
            .unwrap_or(true);
        let matches = path.extension().map(|e| e == extension).unwrap_or(false);
        if matches && !temp && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
