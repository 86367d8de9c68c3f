use std::collections::HashMap;

use crate::services::materializer::MaterializedEntry;
use crate::services::rewrite::route_key;

/// Upstream target of a playlist-track route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRoute {
    pub name: String,
    pub upstream_uri: String,
}

/// Immutable map from credential-free track paths to upstream URIs.
///
/// Built once before the server accepts connections; lookups need no lock.
#[derive(Debug, Default)]
pub struct RouteTable {
    token: String,
    routes: HashMap<String, TrackRoute>,
}

impl RouteTable {
    pub fn empty(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            routes: HashMap::new(),
        }
    }

    /// Register one route per entry; a path seen twice keeps its first target
    pub fn build(token: impl Into<String>, entries: &[MaterializedEntry]) -> Self {
        let mut table = Self::empty(token);
        let mut collisions = 0usize;

        for entry in entries {
            let key = route_key(&table.token, entry.index, entry.basename.as_deref());
            if table.routes.contains_key(&key) {
                collisions += 1;
                tracing::warn!(track = %entry.name, path = %key, "route collision, skipping track");
                continue;
            }
            table.routes.insert(
                key,
                TrackRoute {
                    name: entry.name.clone(),
                    upstream_uri: entry.upstream_uri.clone(),
                },
            );
        }

        tracing::info!(routes = table.routes.len(), collisions, "route table built");
        table
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn lookup(&self, index: usize, basename: Option<&str>) -> Option<&TrackRoute> {
        self.routes.get(&route_key(&self.token, index, basename))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, base: &str, upstream: &str) -> MaterializedEntry {
        MaterializedEntry {
            index,
            basename: Some(base.to_string()),
            name: format!("track {}", index),
            upstream_uri: upstream.to_string(),
            external_uri: String::new(),
        }
    }

    #[test]
    fn test_lookup() {
        let table = RouteTable::build(
            "abc",
            &[
                entry(0, "index.m3u8", "http://one.example/index.m3u8"),
                entry(1, "index.m3u8", "http://two.example/index.m3u8"),
            ],
        );
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.lookup(1, Some("index.m3u8")).unwrap().upstream_uri,
            "http://two.example/index.m3u8"
        );
        assert!(table.lookup(2, Some("index.m3u8")).is_none());
        assert!(table.lookup(0, Some("other.ts")).is_none());
    }

    #[test]
    fn test_collision_keeps_first() {
        let table = RouteTable::build(
            "abc",
            &[
                entry(0, "a.ts", "http://first.example/a.ts"),
                entry(0, "a.ts", "http://second.example/a.ts"),
            ],
        );
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.lookup(0, Some("a.ts")).unwrap().upstream_uri,
            "http://first.example/a.ts"
        );
    }
}
