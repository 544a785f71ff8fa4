//! One JSON file per cache key.
//!
//! Files are written to a temporary name and renamed into place, so a reader
//! never sees a half-written entry. Anything unreadable on load is skipped.

use crate::cache::key::CacheKey;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry<V> {
    pub key: CacheKey,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub payload: V,
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    pub async fn write<V: Serialize>(&self, entry: &PersistedEntry<V>) -> Result<()> {
        let path = self.path_for(&entry.key);
        let temp = self
            .dir
            .join(format!("{}.{}{TEMP_SUFFIX}", entry.key.file_name(), ulid::Ulid::new()));

        let body = serde_json::to_vec_pretty(entry).context("Failed to serialize cache entry")?;
        tokio::fs::write(&temp, body)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e).with_context(|| format!("Failed to move cache entry to {}", path.display()));
        }
        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey) {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
        }
    }

    /// Every entry that parses, belongs to its file name and has not expired
    /// at `now`. Expired files are deleted; corrupt ones are left for
    /// inspection and skipped.
    pub async fn load_all<V: DeserializeOwned>(&self, now: DateTime<Utc>) -> Vec<PersistedEntry<V>> {
        let mut loaded = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cache directory unreadable, starting empty");
                return loaded;
            }
        };

        loop {
            let item = match dir.next_entry().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Stopped scanning cache directory");
                    break;
                }
            };
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };

            if name.ends_with(TEMP_SUFFIX) {
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }

            match Self::read_entry::<V>(&path, &name).await {
                Ok(entry) if entry.expires_at <= now => {
                    debug!(key = %entry.key, "Dropping expired cache file");
                    let _ = tokio::fs::remove_file(&path).await;
                }
                Ok(entry) => loaded.push(entry),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable cache file");
                }
            }
        }

        loaded
    }

    async fn read_entry<V: DeserializeOwned>(path: &Path, name: &str) -> Result<PersistedEntry<V>> {
        let body = tokio::fs::read_to_string(path).await?;
        let entry: PersistedEntry<V> = serde_json::from_str(&body)?;
        if entry.key.file_name() != name {
            anyhow::bail!("entry key {} does not match file name", entry.key);
        }
        if entry.fetched_at > entry.expires_at {
            anyhow::bail!("entry expires before it was fetched");
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teamsl::AdapterRequest;
    use chrono::TimeDelta;

    fn entry(league_id: i64, ttl: TimeDelta) -> PersistedEntry<String> {
        let now = Utc::now();
        PersistedEntry {
            key: CacheKey::for_request(&AdapterRequest::Schedule { league_id }),
            fetched_at: now,
            expires_at: now + ttl,
            payload: format!("league {league_id}"),
        }
    }

    #[tokio::test]
    async fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        store.write(&entry(48714, TimeDelta::minutes(30))).await.unwrap();

        let loaded: Vec<PersistedEntry<String>> = store.load_all(Utc::now()).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].payload, "league 48714");
    }

    #[tokio::test]
    async fn test_expired_and_corrupt_files_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let expired = entry(1, TimeDelta::zero());
        store.write(&expired).await.unwrap();
        std::fs::write(dir.path().join("competition_schedule-garbage.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("leftover.json.01J.tmp"), "partial").unwrap();

        let loaded: Vec<PersistedEntry<String>> = store.load_all(Utc::now()).await;
        assert!(loaded.is_empty());
        assert!(!dir.path().join(expired.key.file_name()).exists());
        assert!(!dir.path().join("leftover.json.01J.tmp").exists());
    }

    #[tokio::test]
    async fn test_entry_under_wrong_name_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let e = entry(7, TimeDelta::minutes(5));
        store.write(&e).await.unwrap();
        std::fs::rename(
            dir.path().join(e.key.file_name()),
            dir.path().join("renamed.json"),
        )
        .unwrap();

        let loaded: Vec<PersistedEntry<String>> = store.load_all(Utc::now()).await;
        assert!(loaded.is_empty());
    }
}
