use crate::feed_store::FeedStore;
use crate::types::{ConsolidatedDataset, CreatorFeed, Result};
use crate::utils::write_atomic;
use chrono::Utc;
use std::path::Path;
use tracing::info;

/// Merges every readable creator artifact into one dataset.
///
/// Always rebuilt from scratch; unreadable artifacts are left out and do not
/// count towards the totals.
pub struct Aggregator;

impl Aggregator {
    pub async fn aggregate(store: &FeedStore) -> Result<ConsolidatedDataset> {
        let feeds = store.list_all().await?;
        Ok(Self::consolidate(feeds))
    }

    pub fn consolidate(feeds: Vec<CreatorFeed>) -> ConsolidatedDataset {
        let total_videos = feeds.iter().map(CreatorFeed::video_count).sum();

        ConsolidatedDataset {
            generated_at: Utc::now(),
            total_users: feeds.len(),
            total_videos,
            users: feeds,
        }
    }

    pub async fn write(dataset: &ConsolidatedDataset, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_vec_pretty(dataset)?).await?;
        info!(
            "Created consolidated JSON {}: {} users, {} videos",
            path.display(),
            dataset.total_users,
            dataset.total_videos
        );
        Ok(())
    }
}
