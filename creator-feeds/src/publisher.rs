use crate::feed_store::FeedStore;
use crate::traits::Publisher;
use crate::types::{
    CreatorFeed, FeedError, IndexEntry, IndexManifest, PublishConfig, PublishedArtifact, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{error, info, warn};

const UPLOAD_SOURCE: &str = "creator-feeds";

/// Uploads artifacts to any `ObjectStore` (Google Cloud Storage in production).
pub struct ObjectStorePublisher {
    store: Arc<dyn ObjectStore>,
    label: String,
}

impl ObjectStorePublisher {
    pub fn new(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    /// GCS bucket from `config`. Falls back to ambient credentials when no
    /// service-account file is given.
    pub fn gcs(config: &PublishConfig) -> Result<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&config.bucket);
        if let Some(ref credentials) = config.credentials_path {
            builder = builder.with_service_account_path(credentials.to_string_lossy());
        }

        let store = builder
            .build()
            .map_err(|e| FeedError::Configuration(e.to_string()))?;

        Ok(Self::new(Arc::new(store), format!("gs://{}", config.bucket)))
    }

    async fn put(&self, key: &str, data: Vec<u8>, attributes: Attributes) -> Result<()> {
        let location = ObjectPath::from(key);
        let size = data.len();
        let start = Instant::now();

        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, PutPayload::from(Bytes::from(data)), opts)
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    key = %key,
                    size_bytes = size,
                    "Upload to {} failed",
                    self.label
                );
                FeedError::Publish {
                    key: key.to_string(),
                    message: e.to_string(),
                }
            })?;

        info!(
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Uploaded to {}",
            self.label
        );
        Ok(())
    }
}

#[async_trait]
impl Publisher for ObjectStorePublisher {
    async fn publish(&self, local_path: &Path, remote_key: &str) -> Result<()> {
        if !fs::try_exists(local_path).await? {
            return Err(FeedError::NotFound(local_path.display().to_string()));
        }
        let data = fs::read(local_path).await?;

        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type_for(local_path) {
            attributes.insert(Attribute::ContentType, AttributeValue::from(content_type));
        }
        attributes.insert(
            Attribute::Metadata(Cow::Borrowed("uploaded_at")),
            AttributeValue::from(Utc::now().to_rfc3339()),
        );
        attributes.insert(
            Attribute::Metadata(Cow::Borrowed("source")),
            AttributeValue::from(UPLOAD_SOURCE),
        );
        attributes.insert(
            Attribute::Metadata(Cow::Borrowed("file_size")),
            AttributeValue::from(data.len().to_string()),
        );

        self.put(remote_key, data, attributes).await
    }

    async fn create_index(&self, published: &[PublishedArtifact], index_key: &str) -> Result<()> {
        let manifest = build_index(published).await;
        let body = serde_json::to_vec_pretty(&manifest)?;

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from("application/json"),
        );
        attributes.insert(
            Attribute::Metadata(Cow::Borrowed("type")),
            AttributeValue::from("index"),
        );

        self.put(index_key, body, attributes).await?;
        info!(
            "Created index {} with {} files at {}",
            index_key, manifest.total_files, self.label
        );
        Ok(())
    }
}

/// MIME type by file extension.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "json" => Some("application/json"),
        "xml" => Some("application/xml"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "csv" => Some("text/csv"),
        _ => None,
    }
}

/// Manifest for `published`. Artifacts that cannot be read back still get an
/// entry, with zero videos and no update time.
pub async fn build_index(published: &[PublishedArtifact]) -> IndexManifest {
    let mut files = Vec::with_capacity(published.len());

    for artifact in published {
        let path = &artifact.local_path;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let user = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (video_count, last_updated) = match read_artifact(path).await {
            Some(feed) => (feed.video_count(), Some(feed.updated)),
            None => (0, None),
        };
        let size = fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

        files.push(IndexEntry {
            user,
            filename,
            remote_path: artifact.remote_key.clone(),
            video_count,
            last_updated,
            size,
        });
    }

    IndexManifest {
        generated_at: Utc::now(),
        total_files: files.len(),
        files,
    }
}

async fn read_artifact(path: &Path) -> Option<CreatorFeed> {
    let bytes = fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Upload every JSON artifact under `config.json_prefix`, then write the
/// index for the ones that made it. Individual upload failures are logged
/// and left out of the index.
pub async fn publish_store(
    publisher: &dyn Publisher,
    store: &FeedStore,
    config: &PublishConfig,
) -> Result<Vec<PublishedArtifact>> {
    let paths = store.artifact_paths().await?;
    if paths.is_empty() {
        warn!("No JSON files found in {}", store.json_dir().display());
        return Ok(Vec::new());
    }

    info!("Found {} JSON files to upload", paths.len());

    let mut published = Vec::new();
    for path in paths {
        let filename = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let remote_key = format!("{}{}", config.json_prefix, filename);

        match publisher.publish(&path, &remote_key).await {
            Ok(()) => published.push(PublishedArtifact {
                local_path: path,
                remote_key,
            }),
            Err(e) => warn!("Error uploading {}: {}", path.display(), e),
        }
    }

    if published.is_empty() {
        warn!("No files were uploaded");
        return Ok(published);
    }

    publisher.create_index(&published, &config.index_key).await?;
    info!("Successfully uploaded {} files", published.len());
    Ok(published)
}
