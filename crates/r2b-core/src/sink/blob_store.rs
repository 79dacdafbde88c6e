//! Object-store backed sink.
//!
//! Each drain writes one object per key:
//!
//! ```text
//! <prefix>/<key>/data_<YYYYmmdd_HHMMSS_micros>.txt
//! ```
//!
//! The object body is the key's records joined by `'\n'`. The key plays
//! the role of a container: it is the first path segment under the prefix,
//! and stores without real directories create it implicitly.

use super::{Sink, WriteReceipt};
use crate::config::StorageConfig;
use crate::error::SinkError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info};

/// Object name for a batch written at `at`.
pub fn blob_name(at: DateTime<Utc>) -> String {
    format!("data_{}.txt", at.format("%Y%m%d_%H%M%S_%6f"))
}

/// Sink writing one object per key per drain.
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    name: String,
}

impl ObjectStoreSink {
    /// Wrap an existing store. `prefix` is prepended to every object path.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self {
            store,
            prefix,
            name: "object_store".to_string(),
        }
    }

    /// In-process store, for tests and dry runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), None).named("memory")
    }

    /// Build the sink from the configured location.
    pub fn from_config(config: &StorageConfig) -> Result<Self, SinkError> {
        let location = config.location.trim();

        if let Some(rest) = location.strip_prefix("s3://") {
            Self::create_s3(rest, config)
        } else if location.starts_with("memory://") {
            Ok(Self::in_memory())
        } else if location.contains("://") {
            Err(SinkError::InvalidLocation(format!(
                "unsupported scheme in {}",
                location
            )))
        } else {
            Self::create_local(location)
        }
    }

    fn create_s3(rest: &str, config: &StorageConfig) -> Result<Self, SinkError> {
        use object_store::aws::AmazonS3Builder;

        let mut parts = rest.splitn(2, '/');
        let bucket = parts
            .next()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| SinkError::InvalidLocation("Invalid S3 path".into()))?;
        let prefix = parts.next().map(str::to_string);

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

        if let Some(ref region) = config.aws_region {
            builder = builder.with_region(region);
        }

        if let Some(ref endpoint) = config.s3_endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| SinkError::Backend(e.to_string()))?;

        info!(bucket = %bucket, prefix = ?prefix, "Using S3 storage");
        Ok(Self::new(Arc::new(store), prefix).named("s3"))
    }

    fn create_local(location: &str) -> Result<Self, SinkError> {
        use object_store::local::LocalFileSystem;

        let path = std::path::Path::new(location);

        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| {
                SinkError::Backend(format!(
                    "Failed to create local storage directory: {}",
                    e
                ))
            })?;
        }

        let store = LocalFileSystem::new_with_prefix(path).map_err(|e| {
            SinkError::Backend(format!("Failed to create local file system store: {}", e))
        })?;

        info!(path = %path.display(), "Using local storage");
        Ok(Self::new(Arc::new(store), None).named("local"))
    }

    fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Underlying store, for reading batches back.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    /// Full object path for a key's batch.
    pub fn object_path(&self, key: &str, at: DateTime<Utc>) -> ObjectPath {
        let name = blob_name(at);
        let mut parts: Vec<&str> = self
            .prefix
            .as_deref()
            .map(|p| p.split('/').collect())
            .unwrap_or_default();
        parts.push(key);
        parts.push(&name);
        ObjectPath::from_iter(parts)
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    async fn write(&self, key: &str, records: &[String]) -> Result<WriteReceipt, SinkError> {
        let path = self.object_path(key, Utc::now());
        let body = records.join("\n");
        let bytes = body.len();

        self.store
            .put(&path, PutPayload::from_bytes(Bytes::from(body)))
            .await
            .map_err(|e| SinkError::WriteFailed {
                key: key.to_string(),
                message: format!("Failed to upload {}: {}", path, e),
            })?;

        debug!(key = %key, path = %path, records = records.len(), bytes, "Batch uploaded");

        Ok(WriteReceipt {
            key: key.to_string(),
            location: path.to_string(),
            records: records.len(),
            bytes,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::TryStreamExt;

    async fn read(store: &Arc<dyn ObjectStore>, location: &str) -> String {
        let bytes = store
            .get(&ObjectPath::from(location))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_blob_name_format() {
        let at = Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(42))
            .unwrap();
        assert_eq!(blob_name(at), "data_20240309_140507_000042.txt");
    }

    #[test]
    fn test_object_path_with_prefix() {
        let sink = ObjectStoreSink::new(
            Arc::new(object_store::memory::InMemory::new()),
            Some("/raw/payloads/".into()),
        );
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            sink.object_path("groupA-1", at).to_string(),
            "raw/payloads/groupA-1/data_20240101_000000_000000.txt"
        );
    }

    #[tokio::test]
    async fn test_write_joins_records_with_newlines() {
        let sink = ObjectStoreSink::in_memory();
        let records = vec!["1, groupA, x".to_string(), "1, groupA, y".to_string()];

        let receipt = sink.write("groupA-1", &records).await.unwrap();
        assert_eq!(receipt.key, "groupA-1");
        assert_eq!(receipt.records, 2);
        assert!(receipt.location.starts_with("groupA-1/data_"));

        let body = read(&sink.store(), &receipt.location).await;
        assert_eq!(body, "1, groupA, x\n1, groupA, y");
        assert_eq!(receipt.bytes, body.len());
    }

    #[tokio::test]
    async fn test_keys_land_in_separate_containers() {
        let sink = ObjectStoreSink::in_memory();
        sink.write("groupA-1", &["a".to_string()]).await.unwrap();
        sink.write("invalid-data", &["b".to_string()]).await.unwrap();

        let store = sink.store();
        let listed: Vec<_> = store
            .list(Some(&ObjectPath::from("invalid-data")))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_local_store_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("nested").join("blobs");
        let config = StorageConfig {
            location: location.to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };

        let sink = ObjectStoreSink::from_config(&config).unwrap();
        assert_eq!(sink.name(), "local");

        let receipt = sink
            .write("groupB-9", &["9, groupB, z".to_string()])
            .await
            .unwrap();
        let on_disk = location.join(&receipt.location);
        assert_eq!(std::fs::read_to_string(on_disk).unwrap(), "9, groupB, z");
    }

    #[test]
    fn test_location_schemes() {
        let memory = StorageConfig {
            location: "memory://".into(),
            ..StorageConfig::default()
        };
        assert_eq!(ObjectStoreSink::from_config(&memory).unwrap().name(), "memory");

        let unsupported = StorageConfig {
            location: "ftp://host/dir".into(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            ObjectStoreSink::from_config(&unsupported),
            Err(SinkError::InvalidLocation(_))
        ));

        let no_bucket = StorageConfig {
            location: "s3://".into(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            ObjectStoreSink::from_config(&no_bucket),
            Err(SinkError::InvalidLocation(_))
        ));
    }
}
