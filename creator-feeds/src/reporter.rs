use crate::feed_store::FeedStore;
use crate::types::{CreatorFeed, CreatorSummary, ReportTotals, Result, SummaryReport};
use crate::utils::write_atomic;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Per-creator and global engagement statistics.
pub struct Reporter;

impl Reporter {
    pub async fn report(store: &FeedStore) -> Result<SummaryReport> {
        let feeds = store.list_all().await?;
        Ok(Self::summarize(&feeds))
    }

    pub fn summarize(feeds: &[CreatorFeed]) -> SummaryReport {
        let mut users = BTreeMap::new();
        let mut totals = ReportTotals::default();

        for feed in feeds {
            let summary = Self::summarize_creator(feed);

            totals.users += 1;
            totals.videos += summary.video_count;
            totals.total_views += summary.total_views;
            totals.total_likes += summary.total_likes;
            totals.total_comments += summary.total_comments;
            totals.total_shares += summary.total_shares;

            users.insert(feed.user.clone(), summary);
        }

        SummaryReport {
            generated_at: Utc::now(),
            users,
            totals,
        }
    }

    /// `latest_video` is the greatest `created_time` by string order. Every
    /// stored timestamp has the same fixed-width UTC form, so this is also
    /// the most recent one.
    pub fn summarize_creator(feed: &CreatorFeed) -> CreatorSummary {
        let mut summary = CreatorSummary {
            video_count: feed.video_count(),
            ..Default::default()
        };

        for video in &feed.videos {
            summary.total_views += video.stats.views;
            summary.total_likes += video.stats.likes;
            summary.total_comments += video.stats.comments;
            summary.total_shares += video.stats.shares;

            if let Some(created) = video.created_time.as_deref() {
                let newer = summary
                    .latest_video
                    .as_deref()
                    .map_or(true, |latest| created > latest);
                if newer {
                    summary.latest_video = Some(created.to_string());
                }
            }
        }

        summary
    }

    pub async fn write(report: &SummaryReport, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_vec_pretty(report)?).await?;

        let totals = &report.totals;
        info!("Generated summary report: {}", path.display());
        info!("  Users: {}", totals.users);
        info!("  Videos: {}", totals.videos);
        info!("  Total views: {}", totals.total_views);
        info!("  Total likes: {}", totals.total_likes);
        info!("  Total comments: {}", totals.total_comments);
        info!("  Total shares: {}", totals.total_shares);
        Ok(())
    }
}
