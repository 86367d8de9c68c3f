use crate::models::{Playlist, Tag, Track};
use crate::services::m3u_parser::write_track;
use crate::services::metrics;
use crate::services::rewrite::{basename, RewriteMode, UrlRewriter};

/// A track that survived filtering and rewriting
#[derive(Debug, Clone)]
pub struct MaterializedEntry {
    /// Compacted position in the served playlist
    pub index: usize,
    pub basename: Option<String>,
    pub name: String,
    pub upstream_uri: String,
    pub external_uri: String,
}

/// Serialized playlist plus the mapping used to build the route table
#[derive(Debug, Clone, Default)]
pub struct Materialized {
    pub bytes: Vec<u8>,
    pub entries: Vec<MaterializedEntry>,
}

fn allowed(track: &Track, group_filter: &[String]) -> bool {
    if group_filter.is_empty() {
        return true;
    }
    track
        .group_title()
        .map(|group| group_filter.iter().any(|g| g == group))
        .unwrap_or(false)
}

/// Filter, rewrite and serialize a playlist.
///
/// Tracks outside `group_filter` are skipped before rewriting. Tracks whose
/// URI cannot be rewritten are dropped and do not consume an index.
pub fn materialize(
    playlist: &Playlist,
    mode: RewriteMode,
    group_filter: &[String],
    rewriter: &UrlRewriter,
) -> Materialized {
    let mut out = String::with_capacity(64 + playlist.len() * 160);
    out.push_str("#EXTM3U\n");

    let mut entries = Vec::with_capacity(playlist.len());
    let mut filtered = 0usize;

    for track in &playlist.tracks {
        if !allowed(track, group_filter) {
            filtered += 1;
            continue;
        }

        let index = entries.len();
        let external_uri = match rewriter.rewrite(&track.uri, index, mode) {
            Ok(uri) => uri,
            Err(e) => {
                metrics::DROPPED_TRACKS.inc();
                tracing::warn!(track = %track.name, error = %e, "dropping track");
                continue;
            }
        };

        let tags = match mode {
            RewriteMode::Playlist => track.tags.clone(),
            RewriteMode::Xtream => track
                .tags
                .iter()
                .map(|t| Tag::new(t.name.clone(), rewriter.swap_text_credentials(&t.value)))
                .collect(),
        };

        let served = Track {
            name: track.name.clone(),
            length: track.length,
            uri: external_uri.clone(),
            tags,
        };
        write_track(&mut out, &served);

        let base = url::Url::parse(&track.uri)
            .ok()
            .and_then(|u| basename(u.path()).map(str::to_string));

        entries.push(MaterializedEntry {
            index,
            basename: base,
            name: track.name.clone(),
            upstream_uri: track.uri.clone(),
            external_uri,
        });
    }

    tracing::info!(
        tracks = entries.len(),
        filtered,
        dropped = playlist.len() - filtered - entries.len(),
        "playlist materialized"
    );

    Materialized {
        bytes: out.into_bytes(),
        entries,
    }
}
