use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::CacheMeta;
use crate::services::m3u_parser::hash_url;
use crate::services::metrics;

/// Output of a cache build: serialized playlist and its track count
pub struct Built {
    pub bytes: Vec<u8>,
    pub track_count: usize,
}

/// Disk-backed cache of materialized playlists.
///
/// Blobs live in `<cache_dir>/<sha1(key)>.m3u` next to a `.meta.json`
/// sidecar. Keys may embed upstream credentials, so only their hash is
/// persisted and the index is keyed by that hash. The index is shared
/// between clones; builds never hold its lock.
#[derive(Clone)]
pub struct PlaylistCache {
    cache_dir: PathBuf,
    max_age: Duration,
    index: Arc<RwLock<HashMap<String, CacheMeta>>>,
}

/// Unique sibling of `path` for one write; concurrent writers never share it
fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    let written = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        // Atomic replace to avoid readers seeing partial writes
        fs::rename(&tmp_path, path).await
    }
    .await;

    if written.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    Ok(written?)
}

impl PlaylistCache {
    /// Create the cache directory and load surviving metadata
    pub async fn new(cache_dir: impl Into<PathBuf>, expiration_hours: u32) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)
            .await
            .with_context(|| format!("cannot create cache directory {}", cache_dir.display()))?;

        let cache = Self {
            cache_dir,
            max_age: Duration::hours(i64::from(expiration_hours)),
            index: Arc::new(RwLock::new(HashMap::new())),
        };
        cache.load_index().await?;
        Ok(cache)
    }

    /// Load all .meta.json files into the in-memory index
    async fn load_index(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.cache_dir).await?;
        let now = Utc::now();
        let mut loaded = HashMap::new();
        let mut stale = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.ends_with(".tmp") {
                // left behind by an interrupted write
                let _ = fs::remove_file(&path).await;
                continue;
            }
            if !name.ends_with(".meta.json") {
                continue;
            }

            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Failed to read cache file {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<CacheMeta>(&content) {
                Ok(meta) if meta.is_fresh_at(now, self.max_age) => {
                    loaded.insert(meta.key_hash.clone(), meta);
                }
                Ok(meta) => stale.push(meta),
                Err(e) => {
                    tracing::warn!("Failed to parse cache metadata {}: {}", path.display(), e);
                }
            }
        }

        tracing::info!("Loaded {} cached playlists", loaded.len());
        *self.index.write().await = loaded;

        for meta in stale {
            self.delete_files(&meta.key_hash).await;
        }
        Ok(())
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Metadata for `key` and whether it is still fresh at `now`
    pub async fn fetch_at(&self, key: &str, now: DateTime<Utc>) -> Option<(CacheMeta, bool)> {
        let index = self.index.read().await;
        let meta = index.get(&hash_url(key))?.clone();
        let fresh = meta.is_fresh_at(now, self.max_age);
        Some((meta, fresh))
    }

    pub async fn fetch(&self, key: &str) -> Option<(CacheMeta, bool)> {
        self.fetch_at(key, Utc::now()).await
    }

    /// Write a blob atomically and replace the index entry wholesale
    pub async fn store_at(&self, key: &str, built: &Built, now: DateTime<Utc>) -> Result<CacheMeta> {
        let hash = hash_url(key);
        let blob_path = self.blob_path(&hash);
        write_atomic(&blob_path, &built.bytes)
            .await
            .context("failed to write playlist blob")?;

        let meta = CacheMeta {
            key_hash: hash.clone(),
            blob_path,
            created_at: now,
            size_bytes: built.bytes.len() as u64,
            track_count: built.track_count,
        };
        let content = serde_json::to_vec_pretty(&meta)?;
        write_atomic(&self.meta_path(&hash), &content)
            .await
            .context("failed to write cache metadata")?;

        self.index.write().await.insert(hash, meta.clone());
        Ok(meta)
    }

    pub async fn read_blob(&self, meta: &CacheMeta) -> Result<Vec<u8>> {
        fs::read(&meta.blob_path)
            .await
            .with_context(|| format!("cache blob missing for {}", meta.blob_path.display()))
    }

    /// Serve a fresh blob or rebuild it with `build`.
    ///
    /// Concurrent misses for the same key may each rebuild; the last store wins.
    pub async fn get_or_build_at<F, Fut>(&self, key: &str, now: DateTime<Utc>, build: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Built>>,
    {
        if let Some((meta, true)) = self.fetch_at(key, now).await {
            match self.read_blob(&meta).await {
                Ok(bytes) => {
                    metrics::PLAYLIST_CACHE.with_label_values(&["hit"]).inc();
                    return Ok(bytes);
                }
                Err(e) => tracing::warn!(error = %e, "cached playlist unreadable, rebuilding"),
            }
        }

        metrics::PLAYLIST_CACHE.with_label_values(&["miss"]).inc();
        let built = build().await?;
        let meta = self.store_at(key, &built, now).await?;
        tracing::info!(
            tracks = meta.track_count,
            size_bytes = meta.size_bytes,
            "playlist cache rebuilt"
        );
        Ok(built.bytes)
    }

    pub async fn get_or_build<F, Fut>(&self, key: &str, build: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Built>>,
    {
        self.get_or_build_at(key, Utc::now(), build).await
    }

    /// Remove entries that are stale at `now`, except the keys in `keep`
    pub async fn evict_stale_at(&self, now: DateTime<Utc>, keep: &[&str]) -> usize {
        let keep: Vec<String> = keep.iter().map(|key| hash_url(key)).collect();
        let stale: Vec<String> = {
            let index = self.index.read().await;
            index
                .values()
                .filter(|meta| !meta.is_fresh_at(now, self.max_age))
                .filter(|meta| !keep.contains(&meta.key_hash))
                .map(|meta| meta.key_hash.clone())
                .collect()
        };

        for hash in &stale {
            self.delete_files(hash).await;
        }
        stale.len()
    }

    async fn delete_files(&self, hash: &str) {
        let _ = fs::remove_file(self.blob_path(hash)).await;
        let _ = fs::remove_file(self.meta_path(hash)).await;

        let mut index = self.index.write().await;
        index.remove(hash);
    }

    /// Get number of cached playlists
    pub async fn entry_count(&self) -> usize {
        self.index.read().await.len()
    }

    // ============ Path Helpers ============

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.m3u", hash))
    }

    fn meta_path(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.meta.json", hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn built(text: &str) -> Built {
        Built {
            bytes: text.as_bytes().to_vec(),
            track_count: 1,
        }
    }

    #[tokio::test]
    async fn test_freshness_window() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
        let builds = AtomicUsize::new(0);
        let t0 = Utc::now();

        for (offset, expected_builds) in [(0, 1), (30, 1), (90, 2)] {
            let bytes = cache
                .get_or_build_at("k", t0 + Duration::minutes(offset), || async {
                    let n = builds.fetch_add(1, Ordering::SeqCst);
                    Ok(built(&format!("v{}", n)))
                })
                .await
                .unwrap();
            assert_eq!(builds.load(Ordering::SeqCst), expected_builds);
            assert_eq!(bytes, format!("v{}", expected_builds - 1).into_bytes());
        }
    }

    #[tokio::test]
    async fn test_fetch_reports_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
        let t0 = Utc::now();
        cache.store_at("k", &built("x"), t0).await.unwrap();

        assert!(cache.fetch_at("k", t0).await.unwrap().1);
        assert!(!cache.fetch_at("k", t0 + Duration::hours(1)).await.unwrap().1);
        assert!(cache.fetch_at("missing", t0).await.is_none());
    }

    #[tokio::test]
    async fn test_build_error_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
        let result = cache
            .get_or_build("k", || async { Err(anyhow::anyhow!("upstream down")) })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_index_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
            cache.store_at("k", &built("payload"), Utc::now()).await.unwrap();
        }
        let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
        let (meta, fresh) = cache.fetch("k").await.unwrap();
        assert!(fresh);
        assert_eq!(cache.read_blob(&meta).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_evict_stale_keeps_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
        let t0 = Utc::now();
        cache.store_at("old", &built("a"), t0).await.unwrap();
        cache.store_at("pinned", &built("b"), t0).await.unwrap();

        let removed = cache.evict_stale_at(t0 + Duration::hours(2), &["pinned"]).await;
        assert_eq!(removed, 1);
        assert!(cache.fetch("old").await.is_none());
        assert!(cache.fetch("pinned").await.is_some());
        assert!(!dir.path().join(format!("{}.m3u", hash_url("old"))).exists());
    }

    #[tokio::test]
    async fn test_concurrent_stores_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
        let payloads: Vec<Vec<u8>> = (0u8..8).map(|b| vec![b'a' + b; 512 * 1024]).collect();

        let writers = payloads.iter().map(|bytes| {
            let cache = cache.clone();
            let built = Built {
                bytes: bytes.clone(),
                track_count: 1,
            };
            tokio::spawn(async move { cache.store_at("k", &built, Utc::now()).await })
        });
        for writer in futures::future::join_all(writers).await {
            writer.unwrap().unwrap();
        }

        let (meta, _) = cache.fetch("k").await.unwrap();
        let blob = cache.read_blob(&meta).await.unwrap();
        assert!(payloads.contains(&blob));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_sidecar_never_holds_raw_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = "http://panel.example/get.php?username=xu&password=s3cret&type=m3u";
        {
            let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
            cache.store_at(key, &built("#EXTM3U\n"), Utc::now()).await.unwrap();
        }

        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let content = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            assert!(!content.contains("s3cret"));
        }

        let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
        assert!(cache.fetch(key).await.is_some());
    }
}
