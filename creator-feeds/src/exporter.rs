use crate::feed_store::FeedStore;
use crate::types::{CreatorFeed, CsvRow, Result};
use crate::utils::{collapse_newlines, write_atomic};
use std::path::Path;
use tracing::info;

/// Flattens every post of every readable artifact into CSV rows.
pub struct Exporter;

impl Exporter {
    /// Creators in store order, posts in fetch order.
    pub async fn export(store: &FeedStore) -> Result<Vec<CsvRow>> {
        let feeds = store.list_all().await?;
        Ok(Self::rows(&feeds))
    }

    pub fn rows(feeds: &[CreatorFeed]) -> Vec<CsvRow> {
        feeds
            .iter()
            .flat_map(|feed| {
                feed.videos.iter().map(move |video| CsvRow {
                    user: feed.user.clone(),
                    video_id: video.id.clone(),
                    title: collapse_newlines(&video.title),
                    description: collapse_newlines(&video.description),
                    link: video.link.clone(),
                    created_time: video.created_time.clone().unwrap_or_default(),
                    thumbnail_url: video.thumbnail_url.clone().unwrap_or_default(),
                    views: video.stats.views,
                    likes: video.stats.likes,
                    comments: video.stats.comments,
                    shares: video.stats.shares,
                })
            })
            .collect()
    }

    /// Headered UTF-8 CSV.
    pub fn to_csv(rows: &[CsvRow]) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if rows.is_empty() {
            writer.write_record(CSV_HEADER)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| crate::types::FeedError::Io(e.into_error()))
    }

    pub async fn write(rows: &[CsvRow], path: &Path) -> Result<()> {
        write_atomic(path, &Self::to_csv(rows)?).await?;
        info!("Exported {} videos to {}", rows.len(), path.display());
        Ok(())
    }
}

/// Column order, matching the field order of `CsvRow`.
pub const CSV_HEADER: [&str; 11] = [
    "user",
    "video_id",
    "title",
    "description",
    "link",
    "created_time",
    "thumbnail_url",
    "views",
    "likes",
    "comments",
    "shares",
];
