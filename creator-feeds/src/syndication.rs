use crate::feed_store::FeedStore;
use crate::types::{
    CreatorFeed, FeedError, PipelineConfig, PostRecord, PostStats, Result,
    DEFAULT_DESCRIPTION_PLACEHOLDER,
};
use crate::utils::{format_timestamp, truncate_chars};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use rss::{Channel, ChannelBuilder, GuidBuilder, ImageBuilder, Item, ItemBuilder};
use tracing::{debug, info, warn};

const MAX_ITEM_TITLE_CHARS: usize = 255;

/// RSS 2.0 rendition of a creator's feed.
#[derive(Debug, Clone)]
pub struct SyndicationDocument {
    pub user: String,
    pub channel: Channel,
}

impl SyndicationDocument {
    pub fn to_xml(&self) -> String {
        self.channel.to_string()
    }

    pub fn item_count(&self) -> usize {
        self.channel.items().len()
    }
}

/// Item body: inline thumbnail (when mirrored) followed by the caption.
pub fn entry_content(post: &PostRecord) -> String {
    let text = if post.description.is_empty() {
        DEFAULT_DESCRIPTION_PLACEHOLDER
    } else {
        post.description.as_str()
    };

    match &post.thumbnail_url {
        Some(src) => format!("<img src=\"{}\" /> {}", src, text),
        None => text.to_string(),
    }
}

/// Render `feed` as an RSS channel. Items keep fetch order.
pub fn build_document(feed: &CreatorFeed, config: &PipelineConfig) -> SyndicationDocument {
    let title = format!("{}{}", feed.user, config.feed_title_suffix);
    let home = config.platform_url.trim_end_matches('/').to_string();

    let image = ImageBuilder::default()
        .url(config.public_url("feed-logo.png"))
        .title(title.clone())
        .link(home.clone())
        .build();

    let items: Vec<Item> = feed.videos.iter().map(build_item).collect();

    let channel = ChannelBuilder::default()
        .title(title)
        .link(home)
        .description(format!("All the latest posts from {}", feed.user))
        .language(Some("en".to_string()))
        .last_build_date(Some(feed.updated.to_rfc2822()))
        .image(Some(image))
        .items(items)
        .build();

    SyndicationDocument {
        user: feed.user.clone(),
        channel,
    }
}

fn build_item(post: &PostRecord) -> Item {
    let guid = GuidBuilder::default()
        .value(post.link.clone())
        .permalink(true)
        .build();

    let pub_date = post
        .created_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc).to_rfc2822());

    ItemBuilder::default()
        .title(Some(truncate_chars(&post.title, MAX_ITEM_TITLE_CHARS)))
        .link(Some(post.link.clone()))
        .description(Some(entry_content(post)))
        .pub_date(pub_date)
        .guid(Some(guid))
        .build()
}

/// Rebuild a `CreatorFeed` from a syndication document.
///
/// Used to recover JSON artifacts from XML-only snapshots. Engagement
/// counters are not part of the XML and come back as zero.
pub fn parse_document(xml: &str, title_suffix: &str) -> Result<CreatorFeed> {
    let feed = parser::parse(xml.as_bytes())
        .map_err(|e| FeedError::Parse(format!("Failed to parse feed: {}", e)))?;

    let title = feed.title.map(|t| t.content).unwrap_or_default();
    let user = title
        .strip_suffix(title_suffix)
        .unwrap_or(&title)
        .trim()
        .to_string();

    let mut updated: Option<DateTime<Utc>> = None;
    let mut videos = Vec::with_capacity(feed.entries.len());

    for entry in feed.entries {
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_else(|| entry.id.clone());
        let id = entry
            .id
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string();

        let body = entry.summary.map(|s| s.content).unwrap_or_default();
        let (thumbnail_url, description) = split_entry_content(&body);

        if let Some(published) = entry.published {
            updated = Some(updated.map_or(published, |u| u.max(published)));
        }

        videos.push(PostRecord {
            id,
            link,
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            description,
            created_time: entry.published.map(format_timestamp),
            thumbnail_url,
            cover_url: None,
            author: user.clone(),
            stats: PostStats::default(),
        });
    }

    debug!("Parsed syndication document for {} with {} items", user, videos.len());

    Ok(CreatorFeed {
        updated: updated.or(feed.updated).unwrap_or_else(Utc::now),
        user,
        user_info: None,
        videos,
    })
}

/// Inverse of `entry_content`.
fn split_entry_content(body: &str) -> (Option<String>, String) {
    let body = body.trim();
    let (thumbnail, rest) = match body.strip_prefix("<img src=\"") {
        Some(after) => match after.split_once('"') {
            Some((src, tail)) => {
                let tail = tail.trim_start();
                let tail = tail
                    .strip_prefix("/>")
                    .or_else(|| tail.strip_prefix('>'))
                    .unwrap_or(tail);
                (Some(src.to_string()), tail.trim())
            }
            None => (None, body),
        },
        None => (None, body),
    };

    let description = if rest == DEFAULT_DESCRIPTION_PLACEHOLDER {
        String::new()
    } else {
        rest.to_string()
    };
    (thumbnail, description)
}

/// Rebuild `json/<name>.json` for every `rss/<name>.xml` in `store`.
///
/// Documents that fail to parse are skipped. Returns how many were converted.
pub async fn convert_all(store: &FeedStore, title_suffix: &str) -> Result<usize> {
    let mut converted = 0;

    for path in store.syndication_paths().await? {
        let xml = match tokio::fs::read_to_string(&path).await {
            Ok(xml) => xml,
            Err(e) => {
                warn!("Error reading {}: {}", path.display(), e);
                continue;
            }
        };

        let mut feed = match parse_document(&xml, title_suffix) {
            Ok(feed) => feed,
            Err(e) => {
                warn!("Error converting {}: {}", path.display(), e);
                continue;
            }
        };

        // The file name is authoritative when the channel title is unusable.
        if let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) {
            if feed.user != stem {
                debug!("Using file name {} over channel title {}", stem, feed.user);
                for video in &mut feed.videos {
                    video.author = stem.clone();
                }
                feed.user = stem;
            }
        }

        match store.save_feed(&feed).await {
            Ok(json_path) => {
                info!("Converted {} to {}", path.display(), json_path.display());
                converted += 1;
            }
            Err(e) => warn!("Error writing JSON for {}: {}", path.display(), e),
        }
    }

    info!("Converted {} RSS files to JSON", converted);
    Ok(converted)
}
