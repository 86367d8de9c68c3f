use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Where a live stream was last redirected to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub scheme: String,
    /// Host with explicit port when the location carried one
    pub host: String,
    pub recorded_at: DateTime<Utc>,
}

impl RedirectTarget {
    pub fn from_location(location: &Url, now: DateTime<Utc>) -> Option<Self> {
        let host = location.host_str()?;
        let host = match location.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Some(Self {
            scheme: location.scheme().to_string(),
            host,
            recorded_at: now,
        })
    }

    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }
}

/// Bounded, expiring map from stream identifier to redirect target.
///
/// A zero TTL disables expiry; the capacity bound still applies.
#[derive(Clone)]
pub struct HlsRedirectTable {
    entries: Arc<RwLock<LruCache<String, RedirectTarget>>>,
    ttl: Option<Duration>,
}

impl HlsRedirectTable {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(RwLock::new(LruCache::new(capacity))),
            ttl: (ttl > Duration::zero()).then_some(ttl),
        }
    }

    fn is_expired(&self, target: &RedirectTarget, now: DateTime<Utc>) -> bool {
        self.ttl
            .map(|ttl| now.signed_duration_since(target.recorded_at) >= ttl)
            .unwrap_or(false)
    }

    pub async fn remember(&self, id: &str, target: RedirectTarget) {
        tracing::debug!(id, origin = %target.origin(), "HLS redirect recorded");
        self.entries.write().await.put(id.to_string(), target);
    }

    /// Remembered target for `id` unless it is older than the TTL
    pub async fn resolve_at(&self, id: &str, now: DateTime<Utc>) -> Option<RedirectTarget> {
        let entries = self.entries.read().await;
        let target = entries.peek(id)?;
        if self.is_expired(target, now) {
            return None;
        }
        Some(target.clone())
    }

    pub async fn resolve(&self, id: &str) -> Option<RedirectTarget> {
        self.resolve_at(id, Utc::now()).await
    }

    pub async fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, t)| self.is_expired(t, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.pop(id);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
