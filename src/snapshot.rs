//! Snapshot persistence and the in-process snapshot handle.
//!
//! A snapshot lives at a [`SnapshotLocation`]: a local file or an
//! `s3://bucket/key` object. Publishing is atomic from a reader's point of
//! view: a file is written next to the target and renamed over it, and an
//! S3 object is replaced by a single `PutObject`. Readers see either the
//! previous snapshot or the new one, never a partial write.
//!
//! Publishing is idempotent: when the stored bytes already hash to the same
//! SHA-256 digest, nothing is written.

use anyhow::{bail, Context, Result};
use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::SnapshotConfig;
use crate::models::Snapshot;
use crate::s3::{AwsCredentials, S3Client};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLocation {
    File(PathBuf),
    S3 { bucket: String, key: String },
}

impl FromStr for SnapshotLocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_prefix("s3://") {
            Some(rest) => {
                let (bucket, key) = rest
                    .split_once('/')
                    .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
                    .with_context(|| format!("snapshot location '{}' must be s3://bucket/key", s))?;
                Ok(SnapshotLocation::S3 {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            None if s.trim().is_empty() => bail!("snapshot location is empty"),
            None => Ok(SnapshotLocation::File(PathBuf::from(s))),
        }
    }
}

impl fmt::Display for SnapshotLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotLocation::File(path) => write!(f, "{}", path.display()),
            SnapshotLocation::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Written { digest: String },
    Unchanged { digest: String },
}

enum Backend {
    File(PathBuf),
    S3 { client: S3Client, key: String },
}

pub struct SnapshotStore {
    location: SnapshotLocation,
    backend: Backend,
}

impl SnapshotStore {
    pub fn new(config: &SnapshotConfig) -> Result<Self> {
        let location: SnapshotLocation = config.location.parse()?;
        let backend = match &location {
            SnapshotLocation::File(path) => Backend::File(path.clone()),
            SnapshotLocation::S3 { bucket, key } => Backend::S3 {
                client: S3Client::new(
                    bucket.clone(),
                    config.region.clone(),
                    config.endpoint_url.clone(),
                    AwsCredentials::from_env()?,
                    config.retry_policy(),
                )?,
                key: key.clone(),
            },
        };
        Ok(Self { location, backend })
    }

    /// A store for a local file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            location: SnapshotLocation::File(path.clone()),
            backend: Backend::File(path),
        }
    }

    pub fn location(&self) -> &SnapshotLocation {
        &self.location
    }

    /// Load the published snapshot. A location with nothing published yet
    /// loads as an empty snapshot.
    pub async fn load(&self) -> Result<Snapshot> {
        match self.read_bytes().await? {
            Some(bytes) => decode(&bytes)
                .with_context(|| format!("Invalid snapshot at {}", self.location)),
            None => Ok(Snapshot::default()),
        }
    }

    /// Publish `snapshot`, replacing the previous one.
    pub async fn publish(&self, snapshot: &Snapshot) -> Result<PublishOutcome> {
        let bytes = encode(snapshot)?;
        let new_digest = digest(&bytes);

        if let Some(existing) = self.read_bytes().await? {
            if digest(&existing) == new_digest {
                tracing::info!(location = %self.location, digest = %new_digest, "snapshot unchanged");
                return Ok(PublishOutcome::Unchanged { digest: new_digest });
            }
        }

        match &self.backend {
            Backend::File(path) => write_file_atomic(path, &bytes).await?,
            Backend::S3 { client, key } => client
                .put_object(key, bytes)
                .await
                .with_context(|| format!("Failed to publish snapshot to {}", self.location))?,
        }
        tracing::info!(
            location = %self.location,
            digest = %new_digest,
            items = snapshot.len(),
            "snapshot published"
        );
        Ok(PublishOutcome::Written { digest: new_digest })
    }

    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::File(path) => match tokio::fs::read(path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e)
                    .with_context(|| format!("Failed to read snapshot {}", path.display())),
            },
            Backend::S3 { client, key } => client
                .get_object(key)
                .await
                .with_context(|| format!("Failed to read snapshot {}", self.location)),
        }
    }
}

/// Serialize a snapshot as pretty JSON with a trailing newline.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(snapshot)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Hex SHA-256 of the serialized snapshot.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

async fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid snapshot file name '{}'", path.display()))?;

    tokio::fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.tmp-{}-{}", name, std::process::id(), nanos));

    tokio::fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}

/// The snapshot currently served by this process.
///
/// Readers take a cheap `Arc` of the current snapshot and keep using it for
/// the whole request; a refresh swaps in a new one without blocking them.
pub struct SnapshotHandle {
    current: ArcSwap<Snapshot>,
}

impl SnapshotHandle {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn replace(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemKind, ToolMetadataItem};

    fn snapshot(ids: &[&str]) -> Snapshot {
        Snapshot::from_items(ids.iter().map(|id| ToolMetadataItem {
            id: id.to_string(),
            kind: ItemKind::Page,
            title: id.to_string(),
            summary: format!("summary of {}", id),
            schema: None,
        }))
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            "s3://bucket/nh/snapshot.json".parse::<SnapshotLocation>().unwrap(),
            SnapshotLocation::S3 {
                bucket: "bucket".into(),
                key: "nh/snapshot.json".into()
            }
        );
        assert_eq!(
            "data/snapshot.json".parse::<SnapshotLocation>().unwrap(),
            SnapshotLocation::File(PathBuf::from("data/snapshot.json"))
        );
        assert!("s3://bucket".parse::<SnapshotLocation>().is_err());
        assert!("s3:///key".parse::<SnapshotLocation>().is_err());
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::file(tmp.path().join("none.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::file(tmp.path().join("nested/snapshot.json"));

        let first = store.publish(&snapshot(&["a", "b"])).await.unwrap();
        assert!(matches!(first, PublishOutcome::Written { .. }));
        let second = store.publish(&snapshot(&["a", "b"])).await.unwrap();
        assert!(matches!(second, PublishOutcome::Unchanged { .. }));
        let third = store.publish(&snapshot(&["a"])).await.unwrap();
        assert!(matches!(third, PublishOutcome::Written { .. }));

        assert_eq!(store.load().await.unwrap(), snapshot(&["a"]));
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_load_rejects_duplicate_ids() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("snapshot.json");
        std::fs::write(
            &path,
            r#"[{"id":"a","kind":"page","title":"A","summary":""},{"id":"a","kind":"page","title":"B","summary":""}]"#,
        )
        .unwrap();
        let err = SnapshotStore::file(&path).load().await.unwrap_err();
        assert!(format!("{:#}", err).contains("duplicate snapshot id: a"));
    }

    #[test]
    fn test_handle_swaps_whole_snapshot() {
        let handle = SnapshotHandle::new(snapshot(&["a"]));
        let held = handle.current();
        handle.replace(snapshot(&["b", "c"]));
        assert_eq!(held.len(), 1);
        assert_eq!(handle.current().len(), 2);
    }
}
