use anyhow::{anyhow, bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Response};
use sha1::{Digest, Sha1};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

use crate::models::{redact_url, Playlist, Tag, Track};
use crate::services::metrics;

// Limits for streamed parsing
const MAX_LINE_BYTES: usize = 32 * 1024;
const READ_LINE_TIMEOUT: Duration = Duration::from_secs(10);

const HEADER: &str = "#EXTM3U";
const EXTINF: &str = "#EXTINF:";

lazy_static! {
    /// Regex to parse EXTINF attributes (tvg-id="...", group-title="...", etc)
    static ref ATTR_REGEX: Regex = Regex::new(r#"([A-Za-z0-9_]+(?:-[A-Za-z0-9_]+)*)="([^"]*)""#).unwrap();
}

/// Malformed upstream playlist
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expected #EXTM3U header")]
    MissingHeader,
    #[error("EXTINF line without track name: {0}")]
    MissingName(String),
    #[error("unable to parse track length {0:?}")]
    Length(String),
    #[error("URI with no track")]
    UriWithoutTrack,
    #[error("line exceeds max length of 32768 bytes")]
    LineTooLong,
    #[error("timed out while reading playlist line")]
    Timeout,
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Index of the first comma that is not inside a quoted tag value
fn title_separator(content: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in content.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Parse an EXTINF line
/// Format: #EXTINF:duration tvg-id="..." tvg-name="..." group-title="...",Title
fn parse_extinf(line: &str) -> Result<Track, ParseError> {
    let content = &line[EXTINF.len()..];

    let comma = title_separator(content).ok_or_else(|| ParseError::MissingName(line.to_string()))?;
    let header = &content[..comma];
    let name = content[comma + 1..].trim().to_string();

    let raw_length = header.split_whitespace().next().unwrap_or_default();
    let length = raw_length
        .parse()
        .map_err(|_| ParseError::Length(raw_length.to_string()))?;

    let tags = ATTR_REGEX
        .captures_iter(header)
        .map(|caps| Tag::new(&caps[1], &caps[2]))
        .collect();

    Ok(Track {
        name,
        length,
        uri: String::new(),
        tags,
    })
}

/// Parse line-oriented M3U from any async reader.
///
/// Tracks whose URI is not an absolute URL are dropped with a warning.
pub async fn parse_reader<R>(mut reader: R) -> Result<Playlist, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut found_header = false;
    let mut tracks: Vec<Track> = Vec::new();

    loop {
        line.clear();

        let bytes_read = match tokio::time::timeout(READ_LINE_TIMEOUT, reader.read_line(&mut line)).await {
            Ok(read) => read?,
            Err(_) => return Err(ParseError::Timeout),
        };
        if bytes_read == 0 {
            break;
        }
        if line.len() > MAX_LINE_BYTES {
            return Err(ParseError::LineTooLong);
        }

        let trimmed = line.trim_start_matches('\u{feff}').trim();
        if trimmed.is_empty() {
            continue;
        }

        if !found_header {
            if !trimmed.starts_with(HEADER) {
                return Err(ParseError::MissingHeader);
            }
            found_header = true;
            continue;
        }

        if trimmed.starts_with(EXTINF) {
            tracks.push(parse_extinf(trimmed)?);
            continue;
        }

        // Other directives (#EXTGRP, #EXTVLCOPT, ...)
        if trimmed.starts_with('#') {
            continue;
        }

        match tracks.last_mut() {
            Some(track) => {
                if !track.uri.is_empty() {
                    tracing::debug!(track = %track.name, "second URI line replaces the previous one");
                }
                track.uri = trimmed.to_string();
            }
            None => return Err(ParseError::UriWithoutTrack),
        }
    }

    if !found_header {
        return Err(ParseError::MissingHeader);
    }

    let total = tracks.len();
    let tracks: Vec<Track> = tracks
        .into_iter()
        .filter(|track| {
            let keep = track.has_valid_uri();
            if !keep {
                metrics::DROPPED_TRACKS.inc();
                tracing::warn!(track = %track.name, "dropping track with invalid URI");
            }
            keep
        })
        .collect();

    tracing::debug!(total, kept = tracks.len(), "playlist parsed");
    Ok(Playlist::new(tracks))
}

/// Tag values are quoted without escapes; double quotes become single
/// quotes and line breaks become spaces so the line stays parseable
fn sanitize_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '"' => '\'',
            '\r' | '\n' => ' ',
            c => c,
        })
        .collect()
}

/// Append one track in `#EXTINF` form
pub fn write_track(out: &mut String, track: &Track) {
    out.push_str(EXTINF);
    out.push_str(&track.length.to_string());
    out.push(' ');
    let tags: Vec<String> = track
        .tags
        .iter()
        .map(|t| format!("{}=\"{}\"", t.name, sanitize_value(&t.value)))
        .collect();
    out.push_str(&tags.join(" "));
    out.push_str(", ");
    out.push_str(&track.name.replace(['\r', '\n'], " "));
    out.push('\n');
    out.push_str(&track.uri);
    out.push('\n');
}

/// Serialize a playlist back to M3U bytes
pub fn serialize_playlist(playlist: &Playlist) -> Vec<u8> {
    let mut out = String::with_capacity(64 + playlist.len() * 160);
    out.push_str(HEADER);
    out.push('\n');
    for track in &playlist.tracks {
        write_track(&mut out, track);
    }
    out.into_bytes()
}

/// Generate SHA1 hash of URL for cache key
pub fn hash_url(url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Fetches and parses playlists from files or HTTP(S) URLs
#[derive(Clone)]
pub struct M3UParser {
    client: Client,
    max_retries: u32,
}

impl M3UParser {
    /// `client` should carry the user agent and timeouts for playlist fetches
    pub fn new(client: Client, max_retries: u32) -> Self {
        Self {
            client,
            max_retries,
        }
    }

    pub async fn fetch_with_retry(&self, url: &str) -> Result<Response> {
        let mut attempt = 0;

        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                        let backoff_ms = (1u64 << attempt).saturating_mul(500).min(10_000);
                        tracing::warn!("fetch_retry" = attempt + 1, "reason" = "429", "backoff_ms" = backoff_ms);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt += 1;
                        continue;
                    }

                    let reason = status.canonical_reason().unwrap_or("error");
                    bail!("upstream playlist answered HTTP {}: {}", status.as_u16(), reason);
                }
                Err(err) => {
                    if attempt < self.max_retries {
                        let backoff_ms = (1u64 << attempt).saturating_mul(500).min(10_000);
                        tracing::warn!("fetch_retry" = attempt + 1, "reason" = "network", "backoff_ms" = backoff_ms);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(anyhow!(err.without_url()).context("failed to reach upstream playlist"));
                }
            }
        }
    }

    /// Parse a playlist from a file path or an HTTP(S) URL
    pub async fn parse_source(&self, source: &str) -> Result<Playlist> {
        if is_remote(source) {
            tracing::info!(source = %redact_url(source, &[]), "fetching playlist");

            let response = self.fetch_with_retry(source).await?;
            if let Some(len) = response.content_length() {
                tracing::info!("Playlist size: {:.2} MB", len as f64 / 1024.0 / 1024.0);
            }

            let stream_reader = StreamReader::new(
                response
                    .bytes_stream()
                    .map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
            );
            let playlist = parse_reader(BufReader::new(stream_reader)).await?;
            Ok(playlist)
        } else {
            let file = tokio::fs::File::open(source)
                .await
                .with_context(|| format!("unable to open playlist file {}", source))?;
            let playlist = parse_reader(BufReader::new(file)).await?;
            Ok(playlist)
        }
    }
}
