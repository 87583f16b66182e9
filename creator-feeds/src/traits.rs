use crate::types::{PublishedArtifact, RawPost, Result, SessionToken};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;

/// Sequence of raw posts for one creator, in platform order.
pub type RawPostStream = BoxStream<'static, Result<RawPost>>;

/// Platform client yielding a creator's recent posts.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Human-readable name for logs
    fn source_name(&self) -> String;

    /// Start fetching at most `limit` posts for `creator`.
    ///
    /// Errors raised while opening the stream or while iterating it abandon
    /// the creator's build.
    async fn posts(&self, creator: &str, session: &SessionToken, limit: usize)
        -> Result<RawPostStream>;
}

/// Renders a remote image URL into JPEG bytes.
#[async_trait]
pub trait Capture: Send + Sync {
    async fn capture(&self, url: &str) -> Result<Vec<u8>>;
}

/// Remote artifact destination.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Upload one local file under `remote_key`.
    async fn publish(&self, local_path: &Path, remote_key: &str) -> Result<()>;

    /// Write the manifest describing `published` to `index_key`.
    async fn create_index(&self, published: &[PublishedArtifact], index_key: &str) -> Result<()>;
}
