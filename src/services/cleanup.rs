//! Cleanup service for stale playlist blobs and HLS redirects
//!
//! Runs as a background task on startup, then periodically.
//! - Deletes cached playlists older than the cache expiration
//! - Forgets HLS redirects older than the same window

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time;

use crate::services::cache::PlaylistCache;
use crate::services::hls::HlsRedirectTable;

/// Configuration for the cleanup service
pub struct CleanupConfig {
    /// How often to run cleanup (in seconds)
    pub interval_secs: u64,
    /// Cache keys that are never evicted (the startup playlist)
    pub pinned_keys: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            pinned_keys: Vec::new(),
        }
    }
}

/// Result of a cleanup operation
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub playlists_deleted: usize,
    pub redirects_deleted: usize,
}

impl CleanupResult {
    pub fn total_deleted(&self) -> usize {
        self.playlists_deleted + self.redirects_deleted
    }
}

/// Run a single cleanup cycle
pub async fn run_cleanup_at(
    cache: &PlaylistCache,
    redirects: &HlsRedirectTable,
    config: &CleanupConfig,
    now: DateTime<Utc>,
) -> CleanupResult {
    let pinned: Vec<&str> = config.pinned_keys.iter().map(String::as_str).collect();

    let result = CleanupResult {
        playlists_deleted: cache.evict_stale_at(now, &pinned).await,
        redirects_deleted: redirects.evict_expired_at(now).await,
    };

    if result.total_deleted() > 0 {
        tracing::info!(
            "Cleanup: deleted {} stale playlists, {} expired HLS redirects",
            result.playlists_deleted,
            result.redirects_deleted
        );
    }
    result
}

/// Start the background cleanup task
///
/// This should be spawned as a background task using `tokio::spawn`.
pub async fn start_cleanup_task(cache: PlaylistCache, redirects: HlsRedirectTable, config: CleanupConfig) {
    tracing::info!("Starting cleanup task (interval: {}s)", config.interval_secs);

    let mut interval = time::interval(Duration::from_secs(config.interval_secs.max(1)));
    loop {
        // First tick completes immediately
        interval.tick().await;
        run_cleanup_at(&cache, &redirects, &config, Utc::now()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::Built;
    use crate::services::hls::RedirectTarget;

    #[tokio::test]
    async fn test_cleanup_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PlaylistCache::new(dir.path(), 1).await.unwrap();
        let redirects = HlsRedirectTable::new(16, cache.max_age());
        let t0 = Utc::now();

        let built = Built {
            bytes: b"#EXTM3U\n".to_vec(),
            track_count: 0,
        };
        cache.store_at("m3u:startup", &built, t0).await.unwrap();
        cache.store_at("apiget:ts", &built, t0).await.unwrap();
        let location = url::Url::parse("http://cdn.example/42.m3u8").unwrap();
        redirects
            .remember("42", RedirectTarget::from_location(&location, t0).unwrap())
            .await;

        let config = CleanupConfig {
            interval_secs: 60,
            pinned_keys: vec!["m3u:startup".to_string()],
        };

        let early = run_cleanup_at(&cache, &redirects, &config, t0).await;
        assert_eq!(early.total_deleted(), 0);

        let late = run_cleanup_at(&cache, &redirects, &config, t0 + chrono::Duration::hours(2)).await;
        assert_eq!(
            late,
            CleanupResult {
                playlists_deleted: 1,
                redirects_deleted: 1
            }
        );
        assert!(cache.fetch("m3u:startup").await.is_some());
    }
}
