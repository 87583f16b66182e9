#![allow(dead_code)]

use async_trait::async_trait;
use creator_feeds::types::*;
use creator_feeds::{
    Capture, CreatorFeedBuilder, FeedStore, PostSource, RawPostStream, RunContext, ThumbnailCache,
};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const MIRROR_BASE: &str = "https://feeds.example.com/thumbnails";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn raw_post(id: &str, create_time: i64, views: u64) -> RawPost {
    RawPost {
        id: id.to_string(),
        desc: Some(format!("Caption for {}", id)),
        create_time: Some(create_time),
        video: RawVideo { cover: None },
        stats: RawStats {
            play_count: Some(views),
            digg_count: Some(views / 2),
            comment_count: Some(1),
            share_count: None,
        },
    }
}

pub fn with_cover(mut post: RawPost, cover: &str) -> RawPost {
    post.video.cover = Some(cover.to_string());
    post
}

/// JPEG-ish bytes; contents are never inspected.
pub const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

/// Capture that records how often it ran.
#[derive(Default)]
pub struct CountingCapture {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl CountingCapture {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capture for CountingCapture {
    async fn capture(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(FeedError::CaptureFailure {
                url: url.to_string(),
                message: "browser crashed".to_string(),
            });
        }
        Ok(FAKE_JPEG.to_vec())
    }
}

/// What the fake platform does for one creator.
#[derive(Clone)]
pub enum Scripted {
    Posts(Vec<RawPost>),
    Unavailable,
    /// Yields the posts, then an error mid-stream.
    BreaksAfter(Vec<RawPost>),
    Hangs,
}

#[derive(Default)]
pub struct StaticPostSource {
    pub creators: HashMap<String, Scripted>,
}

impl StaticPostSource {
    pub fn with(mut self, creator: &str, script: Scripted) -> Self {
        self.creators.insert(creator.to_string(), script);
        self
    }
}

#[async_trait]
impl PostSource for StaticPostSource {
    fn source_name(&self) -> String {
        "static".to_string()
    }

    async fn posts(
        &self,
        creator: &str,
        _session: &SessionToken,
        limit: usize,
    ) -> Result<RawPostStream> {
        let unavailable = || FeedError::SourceUnavailable {
            creator: creator.to_string(),
            message: "HTTP 503: Service Unavailable".to_string(),
        };

        match self.creators.get(creator).cloned() {
            Some(Scripted::Posts(posts)) => Ok(stream::iter(
                posts.into_iter().take(limit).map(Ok::<_, FeedError>),
            )
            .boxed()),
            Some(Scripted::BreaksAfter(posts)) => {
                let err = unavailable();
                let items = posts
                    .into_iter()
                    .map(Ok::<_, FeedError>)
                    .chain(std::iter::once(Err(err)));
                Ok(stream::iter(items).boxed())
            }
            Some(Scripted::Hangs) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(unavailable())
            }
            Some(Scripted::Unavailable) | None => Err(unavailable()),
        }
    }
}

pub fn test_config(output_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        output_dir: output_dir.to_path_buf(),
        base_url: "https://feeds.example.com/".to_string(),
        creator_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

pub fn context(output_dir: &Path, capture: Arc<dyn Capture>) -> Arc<RunContext> {
    let config = test_config(output_dir);
    let cache = ThumbnailCache::new(config.thumbnails_dir(), MIRROR_BASE, capture);
    Arc::new(RunContext::new(SessionToken::new("test-token"), config, cache))
}

pub fn builder(output_dir: &Path, capture: Arc<dyn Capture>) -> CreatorFeedBuilder {
    CreatorFeedBuilder::new(context(output_dir, capture))
}

pub fn posts_stream(posts: Vec<RawPost>) -> RawPostStream {
    stream::iter(posts.into_iter().map(Ok::<_, FeedError>)).boxed()
}

pub fn feed(user: &str, videos: Vec<PostRecord>) -> CreatorFeed {
    CreatorFeed {
        user: user.to_string(),
        updated: chrono::DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default(),
        user_info: None,
        videos,
    }
}

pub fn post(id: &str, created_time: &str, views: u64) -> PostRecord {
    PostRecord {
        id: id.to_string(),
        link: format!("https://www.tiktok.com/@someone/video/{}", id),
        title: format!("Title {}", id),
        description: format!("Description {}", id),
        created_time: Some(created_time.to_string()),
        thumbnail_url: None,
        cover_url: None,
        author: "someone".to_string(),
        stats: PostStats {
            views,
            ..Default::default()
        },
    }
}

pub async fn write_raw(store: &FeedStore, name: &str, contents: &str) {
    tokio::fs::create_dir_all(store.json_dir()).await.unwrap();
    tokio::fs::write(store.json_dir().join(name), contents)
        .await
        .unwrap();
}

/// Canned HTTP reply served by `StubServer`.
#[derive(Clone)]
pub struct StubResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl StubResponse {
    pub fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }
}

/// One-connection-per-request HTTP/1.1 server on a loopback port. Replies
/// come from `responses` in order; the last one repeats.
pub struct StubServer {
    pub base_url: String,
    pub requests: Arc<std::sync::Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start(responses: Vec<StubResponse>) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((mut socket, _)) = listener.accept().await {
                let Some(reply) = responses
                    .get(served)
                    .or_else(|| responses.last())
                    .cloned()
                else {
                    return;
                };
                served += 1;

                let request = read_request(&mut socket).await.unwrap_or_default();
                seen.lock().unwrap().push(request);

                let head = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.status,
                    reply.content_type,
                    reply.body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&reply.body).await;
                let _ = socket.shutdown().await;
            }
        });

        Ok(Self { base_url, requests })
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> String {
        self.requests.lock().unwrap()[index].clone()
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let body_len = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + body_len {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
