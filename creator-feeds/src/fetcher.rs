use crate::traits::{PostSource, RawPostStream};
use crate::types::{FeedError, FetchConfig, RawPost, Result, SessionToken};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// One page of the platform's post listing.
#[derive(Debug, Deserialize)]
struct PostPage {
    #[serde(default, alias = "itemList")]
    posts: Vec<RawPost>,
}

/// `PostSource` backed by a JSON HTTP endpoint:
/// `GET {api_base}/users/{creator}/posts?count={limit}`.
pub struct HttpPostSource {
    client: Client,
    api_base: Url,
    config: FetchConfig,
}

impl HttpPostSource {
    pub fn new(api_base: &str, config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        let api_base = Url::parse(&format!("{}/", api_base.trim_end_matches('/')))?;

        Ok(Self {
            client,
            api_base,
            config,
        })
    }

    fn posts_url(&self, creator: &str, limit: usize) -> Result<Url> {
        let mut url = self.api_base.join(&format!("users/{}/posts", creator))?;
        url.query_pairs_mut()
            .append_pair("count", &limit.to_string());
        Ok(url)
    }

    async fn fetch_page(&self, url: &Url, session: &SessionToken) -> Result<PostPage> {
        let response = self
            .client
            .get(url.clone())
            .header("Cookie", format!("msToken={}", session.expose()))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Parse(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        Ok(response.json::<PostPage>().await?)
    }

    async fn fetch_with_retries(
        &self,
        creator: &str,
        url: &Url,
        session: &SessionToken,
    ) -> Result<PostPage> {
        let start_time = Instant::now();
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.fetch_page(url, session).await {
                Ok(page) => {
                    info!(
                        "Fetched {} posts for {} in {}ms",
                        page.posts.len(),
                        creator,
                        start_time.elapsed().as_millis()
                    );
                    return Ok(page);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!(
                                "Attempt {} failed for {}, retrying in {:?}",
                                attempt + 1,
                                creator,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        Err(FeedError::SourceUnavailable {
            creator: creator.to_string(),
            message,
        })
    }
}

#[async_trait]
impl PostSource for HttpPostSource {
    fn source_name(&self) -> String {
        format!("http:{}", self.api_base)
    }

    async fn posts(
        &self,
        creator: &str,
        session: &SessionToken,
        limit: usize,
    ) -> Result<RawPostStream> {
        if session.is_empty() {
            return Err(FeedError::SourceUnavailable {
                creator: creator.to_string(),
                message: "empty session token".to_string(),
            });
        }

        let url = self.posts_url(creator, limit)?;
        debug!("Fetching posts for {} from {}", creator, url);

        let page = self.fetch_with_retries(creator, &url, session).await?;
        let posts = page.posts.into_iter().take(limit).map(Ok::<_, FeedError>);
        Ok(stream::iter(posts).boxed())
    }
}
