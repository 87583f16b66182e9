use crate::traits::Capture;
use crate::types::{FeedError, Result};
use crate::utils::{validate_creator_id, write_atomic};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as SyncMutex};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Creator-scoped screenshot cache under `<root>/<creator>/screenshot_<key>.jpg`.
///
/// Entries are never evicted. A file that exists is a hit and is never
/// captured again; misses are captured once and renamed into place.
pub struct ThumbnailCache {
    root: PathBuf,
    mirror_base: String,
    capture: Arc<dyn Capture>,
    in_flight: SlotMap,
}

type SlotMap = SyncMutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

impl ThumbnailCache {
    /// `mirror_base` is the public URL `root` is served from.
    pub fn new(root: impl Into<PathBuf>, mirror_base: &str, capture: Arc<dyn Capture>) -> Self {
        Self {
            root: root.into(),
            mirror_base: mirror_base.trim_end_matches('/').to_string(),
            capture,
            in_flight: SyncMutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Last non-empty path segment of `source_url`.
    pub fn cache_key(source_url: &str) -> Result<String> {
        let parsed = Url::parse(source_url)?;
        parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .filter(|segment| *segment != "." && *segment != "..")
            .map(|segment| segment.replace(['\\', ':'], "_"))
            .ok_or_else(|| FeedError::CaptureFailure {
                url: source_url.to_string(),
                message: "no path segment to derive a cache key from".to_string(),
            })
    }

    pub fn local_path(&self, creator: &str, key: &str) -> PathBuf {
        self.root
            .join(creator)
            .join(format!("screenshot_{}.jpg", key))
    }

    pub fn mirror_url(&self, creator: &str, key: &str) -> String {
        format!("{}/{}/screenshot_{}.jpg", self.mirror_base, creator, key)
    }

    /// Map `source_url` to its mirror URL, capturing the image on a miss.
    pub async fn resolve(&self, creator: &str, source_url: &str) -> Result<String> {
        validate_creator_id(creator)?;
        let key = Self::cache_key(source_url)?;
        let path = self.local_path(creator, &key);
        let mirror = self.mirror_url(creator, &key);

        if tokio::fs::try_exists(&path).await? {
            debug!("Thumbnail cache hit for {}: {}", creator, key);
            return Ok(mirror);
        }

        let lease = self.lease(&path);
        let _held = lease.slot.lock().await;

        // Another task may have filled the slot while we waited.
        if tokio::fs::try_exists(&path).await? {
            debug!("Thumbnail cache hit for {} after wait: {}", creator, key);
            return Ok(mirror);
        }

        let bytes = self.capture.capture(source_url).await?;
        write_atomic(&path, &bytes).await?;

        info!("Captured thumbnail for {} into {}", creator, path.display());
        Ok(mirror)
    }

    /// Keys currently being resolved past the first hit check.
    pub fn pending_slots(&self) -> usize {
        lock_slots(&self.in_flight).len()
    }

    fn lease(&self, path: &Path) -> SlotLease<'_> {
        let slot = lock_slots(&self.in_flight)
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SlotLease {
            slots: &self.in_flight,
            path: path.to_path_buf(),
            slot,
        }
    }
}

/// One resolver's claim on a per-path slot. The last lease out removes the
/// slot, including when the resolving future is dropped.
struct SlotLease<'a> {
    slots: &'a SlotMap,
    path: PathBuf,
    slot: Arc<Mutex<()>>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut slots = lock_slots(self.slots);
        // The map and this lease hold the only references.
        if Arc::strong_count(&self.slot) <= 2 {
            slots.remove(&self.path);
        }
    }
}

fn lock_slots(slots: &SlotMap) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<Mutex<()>>>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
