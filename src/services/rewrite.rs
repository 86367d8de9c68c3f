//! URL rewrite engine
//!
//! Maps upstream media URLs into the proxy's URL space and back.
//!
//! Playlist mode hides the upstream path entirely:
//! ```text
//! http://origin.example/chan/bbc.m3u8
//!   -> http://proxy.test:8080/abc123/u/p/0/bbc.m3u8
//! ```
//! Xtream mode keeps the panel's path shape and swaps the credentials:
//! ```text
//! http://panel.example/live/xu/xp/42.ts
//!   -> http://proxy.test:8080/live/u/p/42.ts
//! ```

use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::models::Credential;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    Playlist,
    Xtream,
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("cannot parse upstream URI: {0}")]
    Source(#[from] url::ParseError),
    #[error("rewritten URI is invalid: {0}")]
    Output(String),
}

/// Last non-empty segment of an escaped path
pub fn basename(path: &str) -> Option<&str> {
    path.rsplit('/').find(|seg| !seg.is_empty())
}

/// Key under which a playlist track is reachable, credentials excluded
pub fn route_key(token: &str, index: usize, basename: Option<&str>) -> String {
    match basename {
        Some(base) => format!("/{}/{}/{}", token, index, base),
        None => format!("/{}/{}", token, index),
    }
}

/// Percent-decode one path segment for comparisons
fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Rewrites upstream URLs using the advertised host, port and credentials
#[derive(Debug, Clone)]
pub struct UrlRewriter {
    scheme: &'static str,
    hostname: String,
    port: u16,
    prefix: String,
    token: String,
    user: Credential,
    password: Credential,
    xtream_base_url: String,
    xtream_user: Credential,
    xtream_password: Credential,
}

impl UrlRewriter {
    pub fn new(config: &Config, token: impl Into<String>) -> Self {
        Self {
            scheme: config.scheme(),
            hostname: config.hostname.clone(),
            port: config.advertised_port,
            prefix: config.endpoint_prefix(),
            token: token.into(),
            user: config.user.clone(),
            password: config.password.clone(),
            xtream_base_url: config.xtream_base_url.clone(),
            xtream_user: config.xtream_user.clone(),
            xtream_password: config.xtream_password.clone(),
        }
    }

    /// Produce the externally exposed URL for `original`
    pub fn rewrite(&self, original: &str, index: usize, mode: RewriteMode) -> Result<String, RewriteError> {
        let source = Url::parse(original)?;

        let path = match mode {
            RewriteMode::Playlist => {
                let base = basename(source.path());
                let mut path = format!(
                    "/{}/{}/{}/{}",
                    self.token,
                    self.user.escape_for_path(),
                    self.password.escape_for_path(),
                    index
                );
                if let Some(base) = base {
                    path.push('/');
                    path.push_str(base);
                }
                path
            }
            RewriteMode::Xtream => self.swap_path_credentials(source.path()),
        };

        let userinfo = match (source.username(), source.password()) {
            ("", None) => String::new(),
            (user, None) => format!("{}@", user),
            (user, Some(pass)) => format!("{}:{}@", user, pass),
        };

        let rewritten = format!(
            "{}://{}{}:{}{}{}",
            self.scheme, userinfo, self.hostname, self.port, self.prefix, path
        );

        Url::parse(&rewritten)
            .map(|url| url.to_string())
            .map_err(|e| RewriteError::Output(e.to_string()))
    }

    /// Replace upstream Xtream credentials in an escaped path with the proxy's
    pub fn swap_path_credentials(&self, path: &str) -> String {
        let swaps = [
            (&self.xtream_user, &self.user),
            (&self.xtream_password, &self.password),
        ];

        let segments: Vec<String> = path
            .split('/')
            .map(|segment| {
                let decoded = decode_segment(segment);
                for (from, to) in swaps {
                    if !from.is_empty() && from.matches(&decoded) {
                        return to.escape_for_path();
                    }
                }
                let mut segment = segment.to_string();
                for (from, to) in swaps {
                    if !from.is_empty() {
                        segment = segment.replace(&from.escape_for_path(), &to.escape_for_path());
                    }
                }
                segment
            })
            .collect();

        segments.join("/")
    }

    /// Replace `/{xtreamUser}/{xtreamPassword}/` by the proxy pair in free text
    pub fn swap_text_credentials(&self, text: &str) -> String {
        if self.xtream_user.is_empty() && self.xtream_password.is_empty() {
            return text.to_string();
        }
        let from = format!("/{}/{}/", self.xtream_user, self.xtream_password);
        let to = format!("/{}/{}/", self.user, self.password);
        text.replace(&from, &to)
    }

    /// Upstream URL for an Xtream media path: `kind` is `live`, `movie`,
    /// `series` or empty for the bare `/{user}/{password}/{id}` form
    pub fn xtream_media_url(&self, kind: &str, id: &str) -> String {
        let kind = if kind.is_empty() {
            String::new()
        } else {
            format!("{}/", kind)
        };
        format!(
            "{}/{}{}/{}/{}",
            self.xtream_base_url,
            kind,
            self.xtream_user.escape_for_path(),
            self.xtream_password.escape_for_path(),
            id
        )
    }

    /// Upstream chunk URL from a remembered redirect origin
    pub fn hls_chunk_url(&self, origin: &str, token: &str, channel: &str, hash: &str, chunk: &str) -> String {
        format!(
            "{}/hlsr/{}/{}/{}/{}/{}/{}",
            origin.trim_end_matches('/'),
            token,
            self.xtream_user.escape_for_path(),
            self.xtream_password.escape_for_path(),
            channel,
            hash,
            chunk
        )
    }
}
