use crate::syndication::{build_document, SyndicationDocument};
use crate::thumbnail_cache::ThumbnailCache;
use crate::traits::RawPostStream;
use crate::types::{
    CreatorFeed, PipelineConfig, PostRecord, PostStats, RawPost, Result, SessionToken, UserInfo,
};
use crate::utils::{format_timestamp, timestamp_from_unix, validate_creator_id};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a batch run shares across creators.
///
/// Built once per run and handed to each component instead of living in
/// process-wide state.
pub struct RunContext {
    pub session: SessionToken,
    pub config: PipelineConfig,
    pub cache: ThumbnailCache,
}

impl RunContext {
    pub fn new(session: SessionToken, config: PipelineConfig, cache: ThumbnailCache) -> Self {
        Self {
            session,
            config,
            cache,
        }
    }
}

/// Normalizes one creator's raw posts into a `CreatorFeed` and its RSS document.
pub struct CreatorFeedBuilder {
    ctx: Arc<RunContext>,
}

impl CreatorFeedBuilder {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Consume `raw_posts` in order, up to the configured fetch limit.
    ///
    /// Any error from the stream abandons the whole build; nothing is
    /// returned for a partially read creator.
    pub async fn build(
        &self,
        creator: &str,
        mut raw_posts: RawPostStream,
    ) -> Result<(CreatorFeed, SyndicationDocument)> {
        validate_creator_id(creator)?;
        let config = &self.ctx.config;

        let mut videos = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut latest: Option<DateTime<Utc>> = None;
        let mut consumed = 0usize;

        while consumed < config.fetch_limit {
            let raw = match raw_posts.next().await {
                Some(item) => item?,
                None => break,
            };
            consumed += 1;

            if raw.id.trim().is_empty() {
                warn!("Skipping post without id for {}", creator);
                continue;
            }
            if !seen_ids.insert(raw.id.clone()) {
                debug!("Skipping duplicate post {} for {}", raw.id, creator);
                continue;
            }

            let created = raw.create_time.and_then(timestamp_from_unix);
            if let Some(ts) = created {
                latest = Some(latest.map_or(ts, |l| l.max(ts)));
            }

            videos.push(self.normalize(creator, raw, created).await);
        }

        let now = Utc::now();
        let feed = CreatorFeed {
            user: creator.to_string(),
            updated: latest.unwrap_or(now),
            user_info: Some(UserInfo {
                username: creator.to_string(),
                retrieved_at: now,
            }),
            videos,
        };
        let document = build_document(&feed, config);

        info!(
            "Built feed for {}: {} posts, updated {}",
            creator,
            feed.video_count(),
            format_timestamp(feed.updated)
        );
        Ok((feed, document))
    }

    async fn normalize(
        &self,
        creator: &str,
        raw: RawPost,
        created: Option<DateTime<Utc>>,
    ) -> PostRecord {
        let config = &self.ctx.config;
        // Stored verbatim; only an absent or empty caption falls back.
        let caption = raw.desc.clone().filter(|d| !d.is_empty());

        let cover_url = raw.video.cover.filter(|c| !c.trim().is_empty());
        let thumbnail_url = match &cover_url {
            Some(cover) => match self.ctx.cache.resolve(creator, cover).await {
                Ok(mirror) => Some(mirror),
                Err(e) => {
                    warn!("No thumbnail for post {} of {}: {}", raw.id, creator, e);
                    None
                }
            },
            None => None,
        };

        PostRecord {
            link: format!(
                "{}/@{}/video/{}",
                config.platform_url.trim_end_matches('/'),
                creator,
                raw.id
            ),
            title: caption
                .clone()
                .unwrap_or_else(|| config.title_placeholder.clone()),
            description: caption.unwrap_or_default(),
            created_time: created.map(format_timestamp),
            thumbnail_url,
            cover_url,
            author: creator.to_string(),
            stats: PostStats::from(&raw.stats),
            id: raw.id,
        }
    }
}
