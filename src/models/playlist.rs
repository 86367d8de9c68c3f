use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `name="value"` attribute of an EXTINF line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Single playlist entry (channel/movie/episode)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub name: String,
    pub length: i64,
    pub uri: String,
    /// Tags in the order they appeared on the EXTINF line
    pub tags: Vec<Tag>,
}

impl Track {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    pub fn group_title(&self) -> Option<&str> {
        self.tag("group-title")
    }

    /// Tracks are only kept when their URI is an absolute URL
    pub fn has_valid_uri(&self) -> bool {
        url::Url::parse(&self.uri).is_ok()
    }
}

/// Ordered list of tracks. Order is presentation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }
}

/// Cache metadata stored next to each playlist blob in .meta.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    /// sha1 of the cache key; the key itself may carry upstream credentials
    pub key_hash: String,
    pub blob_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub track_count: usize,
}

impl CacheMeta {
    /// Fresh while strictly younger than `max_age`
    pub fn is_fresh_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.created_at) < max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(uri: &str) -> Track {
        Track {
            name: "BBC One".to_string(),
            length: -1,
            uri: uri.to_string(),
            tags: vec![Tag::new("tvg-id", "bbc"), Tag::new("group-title", "News")],
        }
    }

    #[test]
    fn test_tag_lookup() {
        let t = track("http://origin.example/chan/bbc.m3u8");
        assert_eq!(t.tag("tvg-id"), Some("bbc"));
        assert_eq!(t.group_title(), Some("News"));
        assert_eq!(t.tag("tvg-logo"), None);
    }

    #[test]
    fn test_uri_validation() {
        assert!(track("http://origin.example/chan/bbc.m3u8").has_valid_uri());
        assert!(!track("chan/bbc.m3u8").has_valid_uri());
        assert!(!track("").has_valid_uri());
    }

    #[test]
    fn test_cache_meta_freshness_boundary() {
        let created = Utc::now();
        let meta = CacheMeta {
            key_hash: "k".to_string(),
            blob_path: PathBuf::from("/tmp/k.m3u"),
            created_at: created,
            size_bytes: 0,
            track_count: 0,
        };
        let hour = Duration::hours(1);
        assert!(meta.is_fresh_at(created + Duration::minutes(59), hour));
        assert!(!meta.is_fresh_at(created + hour, hour));
    }
}
