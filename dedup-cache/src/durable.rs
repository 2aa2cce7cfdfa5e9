// The durable tier keeps dedup decisions across restarts and instances.
// Stores own the TTL of what they hold: an expired entry is never returned.
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode/decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("unexpected status {status} from durable store: {body}")]
    UnexpectedStatus {
        status: http::StatusCode,
        body: String,
    },

    #[error("invalid stored value: {0}")]
    InvalidValue(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("durable store timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Returns when `key` was recorded, or `None` if it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Stores `key` with its record time; the entry expires after `ttl`.
    async fn put(
        &self,
        key: &str,
        recorded_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct StoredEntry {
    key: String,
    recorded_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Every this many writes, `put` also removes expired files left by keys that
/// were never read again.
const PRUNE_EVERY_PUTS: u64 = 64;

/// Keeps one small JSON file per key under `base_dir`. File names are the
/// SHA-256 of the key so arbitrary input never reaches the filesystem path.
pub struct FilesystemStore {
    base_dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FilesystemStore {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        FilesystemStore {
            base_dir: base_dir.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.base_dir.join(format!("{digest:x}.json"))
    }

    async fn remove_if_present(path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Deletes entries that expired at or before `now`. Files that cannot be
    /// read or decoded are left alone for `get` to report.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(dir_entry) = dir.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            let Ok(entry) = serde_json::from_slice::<StoredEntry>(&bytes) else {
                continue;
            };
            if entry.expires_at <= now {
                Self::remove_if_present(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl DurableStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: StoredEntry = serde_json::from_slice(&bytes)?;
        if entry.key != key {
            return Err(StoreError::InvalidValue(format!("hash collision for key {key}")));
        }

        if entry.expires_at <= Utc::now() {
            Self::remove_if_present(&path).await?;
            return Ok(None);
        }

        Ok(Some(entry.recorded_at))
    }

    async fn put(
        &self,
        key: &str,
        recorded_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let entry = StoredEntry {
            key: key.to_string(),
            recorded_at,
            expires_at: recorded_at + ttl,
        };
        let bytes = serde_json::to_vec(&entry)?;

        // Write to a unique temp file and rename so readers never see a partial entry.
        let path = self.path_for(key);
        let tmp_id = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("{}.{tmp_id}.tmp", std::process::id()));
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        if tmp_id % PRUNE_EVERY_PUTS == 0 {
            match self.prune_expired(Utc::now()).await {
                Ok(removed) => tracing::debug!(removed, "Pruned expired dedup entries"),
                Err(e) => tracing::warn!(error = %e, "Failed to prune expired dedup entries"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filesystem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        let now = Utc::now();

        assert_eq!(store.get("dedup:a@b.c").await.unwrap(), None);

        store
            .put("dedup:a@b.c", now, Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(store.get("dedup:a@b.c").await.unwrap(), Some(now));
        assert_eq!(store.get("dedup:other@b.c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_filesystem_expired_entry_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        let recorded_at = Utc::now() - Duration::hours(25);

        store
            .put("dedup:old@b.c", recorded_at, Duration::hours(24))
            .await
            .unwrap();
        assert!(store.path_for("dedup:old@b.c").exists());

        assert_eq!(store.get("dedup:old@b.c").await.unwrap(), None);
        assert!(!store.path_for("dedup:old@b.c").exists());
    }

    #[tokio::test]
    async fn test_filesystem_put_prunes_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FilesystemStore::new(dir.path());
        let stale = Utc::now() - Duration::hours(25);
        for key in ["dedup:gone1@b.c", "dedup:gone2@b.c", "dedup:gone3@b.c"] {
            writer.put(key, stale, Duration::hours(24)).await.unwrap();
        }
        writer
            .put("dedup:live@b.c", Utc::now(), Duration::hours(24))
            .await
            .unwrap();
        std::fs::write(writer.path_for("dedup:bad@b.c"), b"not json").unwrap();

        // A fresh store prunes on its first write.
        let store = FilesystemStore::new(dir.path());
        store
            .put("dedup:new@b.c", Utc::now(), Duration::hours(24))
            .await
            .unwrap();

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        names.sort();
        let mut expected = vec![
            store.path_for("dedup:live@b.c"),
            store.path_for("dedup:new@b.c"),
            store.path_for("dedup:bad@b.c"),
        ];
        expected.sort();
        assert_eq!(names, expected);
        assert!(store.get("dedup:live@b.c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prune_skips_live_and_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        let now = Utc::now();
        store
            .put("dedup:a@b.c", now, Duration::hours(24))
            .await
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        assert_eq!(store.prune_expired(now).await.unwrap(), 0);
        assert_eq!(
            store
                .prune_expired(now + Duration::hours(24))
                .await
                .unwrap(),
            1
        );
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_filesystem_creates_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().join("nested").join("dedup"));

        store
            .put("dedup:x@y.z", Utc::now(), Duration::hours(24))
            .await
            .unwrap();
        assert!(store.get("dedup:x@y.z").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_filesystem_corrupt_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        std::fs::write(store.path_for("dedup:bad@b.c"), b"not json").unwrap();

        assert!(matches!(
            store.get("dedup:bad@b.c").await,
            Err(StoreError::Json(_))
        ));
    }
}
