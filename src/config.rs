use std::env;
use std::path::PathBuf;

use crate::models::Credential;
use crate::services::xtream::detector::extract_credentials;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub hostname: String,
    pub advertised_port: u16,
    pub https: bool,

    // Proxy credentials
    pub user: Credential,
    pub password: Credential,

    // Upstream M3U
    pub m3u_url: String,
    pub m3u_file_name: String,

    // Upstream Xtream
    pub xtream_base_url: String,
    pub xtream_user: Credential,
    pub xtream_password: Credential,
    pub xtream_api_get: bool,

    // URL space
    pub custom_endpoint: String,
    pub custom_id: String,

    // Cache
    pub cache_expiration_hours: u32,
    pub cache_dir: PathBuf,
    pub group_filter: Vec<String>,
    pub hls_redirect_capacity: usize,
    pub cleanup_interval_secs: u64,

    // Upstream HTTP
    pub connect_timeout_ms: u64,
    pub upstream_timeout_ms: u64,
    pub user_agent: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let config = Self {
            // Server
            port: env_parse("PORT", 8080),
            hostname: env_or("PROXY_HOSTNAME", "localhost"),
            advertised_port: env_parse("ADVERTISED_PORT", 0),
            https: env_bool("HTTPS"),

            user: env_or("PROXY_USER", "usertest").into(),
            password: env_or("PROXY_PASSWORD", "passwordtest").into(),

            m3u_url: env_or("M3U_URL", ""),
            m3u_file_name: env_or("M3U_FILE_NAME", "iptv.m3u"),

            xtream_base_url: env_or("XTREAM_BASE_URL", ""),
            xtream_user: env_or("XTREAM_USER", "").into(),
            xtream_password: env_or("XTREAM_PASSWORD", "").into(),
            xtream_api_get: env_bool("XTREAM_API_GET"),

            custom_endpoint: env_or("CUSTOM_ENDPOINT", ""),
            custom_id: env_or("CUSTOM_ID", ""),

            cache_expiration_hours: env_parse("M3U_CACHE_EXPIRATION", 1),
            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("iptv-proxy-cache")),
            group_filter: env::var("GROUP_FILTER")
                .map(|v| parse_group_filter(&v))
                .unwrap_or_default(),
            hls_redirect_capacity: env_parse("HLS_REDIRECT_CAPACITY", 4096),
            cleanup_interval_secs: env_parse("CLEANUP_INTERVAL_SECS", 600),

            connect_timeout_ms: env_parse("UPSTREAM_CONNECT_TIMEOUT_MS", 10_000),
            upstream_timeout_ms: env_parse("UPSTREAM_TIMEOUT_MS", 300_000),
            // Use VLC user agent to avoid IPTV server blocks
            user_agent: env_or("USER_AGENT", "VLC/3.0.20 LibVLC/3.0.20"),
        };

        config.normalized()
    }

    /// Fill derived values: advertised port, trimmed prefixes and Xtream
    /// credentials taken from a `get.php` playlist URL
    pub fn normalized(mut self) -> Self {
        if self.advertised_port == 0 {
            self.advertised_port = self.port;
        }
        self.custom_endpoint = self.custom_endpoint.trim_matches('/').to_string();
        self.custom_id = self.custom_id.trim_matches('/').to_string();

        if self.xtream_base_url.is_empty()
            && self.xtream_user.is_empty()
            && self.xtream_password.is_empty()
        {
            if let Some(creds) = extract_credentials(&self.m3u_url) {
                tracing::info!(
                    xtream_base_url = %creds.server,
                    "M3U URL looks like an Xtream provider, enabling Xtream endpoints"
                );
                self.xtream_base_url = creds.server;
                self.xtream_user = creds.username.into();
                self.xtream_password = creds.password.into();
            }
        }
        self.xtream_base_url = self.xtream_base_url.trim_end_matches('/').to_string();

        self
    }

    /// Scheme advertised in rewritten URLs
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    pub fn xtream_enabled(&self) -> bool {
        !self.xtream_base_url.is_empty()
    }

    /// `/prefix` or empty when no custom endpoint is configured
    pub fn endpoint_prefix(&self) -> String {
        if self.custom_endpoint.is_empty() {
            String::new()
        } else {
            format!("/{}", self.custom_endpoint)
        }
    }

    pub fn has_empty_credentials(&self) -> bool {
        self.user.is_empty() || self.password.is_empty()
    }
}

/// Split a comma separated allow-list, dropping blanks
pub fn parse_group_filter(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        port: 8080,
        hostname: "proxy.test".to_string(),
        advertised_port: 8080,
        https: false,
        user: "u".into(),
        password: "p".into(),
        m3u_url: String::new(),
        m3u_file_name: "iptv.m3u".to_string(),
        xtream_base_url: String::new(),
        xtream_user: Credential::default(),
        xtream_password: Credential::default(),
        xtream_api_get: false,
        custom_endpoint: String::new(),
        custom_id: "abc123".to_string(),
        cache_expiration_hours: 1,
        cache_dir: env::temp_dir().join("iptv-proxy-test-cache"),
        group_filter: Vec::new(),
        hls_redirect_capacity: 64,
        cleanup_interval_secs: 600,
        connect_timeout_ms: 2_000,
        upstream_timeout_ms: 5_000,
        user_agent: "iptv-proxy-test".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_advertised_port_and_prefix() {
        let mut config = test_config();
        config.advertised_port = 0;
        config.port = 9000;
        config.custom_endpoint = "/tv/".to_string();
        config.custom_id = "/abc/".to_string();
        let config = config.normalized();

        assert_eq!(config.advertised_port, 9000);
        assert_eq!(config.custom_endpoint, "tv");
        assert_eq!(config.endpoint_prefix(), "/tv");
        assert_eq!(config.custom_id, "abc");
    }

    #[test]
    fn test_xtream_auto_detection_from_m3u_url() {
        let mut config = test_config();
        config.m3u_url =
            "http://panel.example:8000/get.php?username=xu&password=xp&type=m3u_plus".to_string();
        let config = config.normalized();

        assert!(config.xtream_enabled());
        assert_eq!(config.xtream_base_url, "http://panel.example:8000");
        assert_eq!(config.xtream_user.render(), "xu");
        assert_eq!(config.xtream_password.render(), "xp");
    }

    #[test]
    fn test_explicit_xtream_config_wins() {
        let mut config = test_config();
        config.m3u_url = "http://panel.example/get.php?username=xu&password=xp".to_string();
        config.xtream_base_url = "http://other.example/".to_string();
        config.xtream_user = "a".into();
        config.xtream_password = "b".into();
        let config = config.normalized();

        assert_eq!(config.xtream_base_url, "http://other.example");
        assert_eq!(config.xtream_user.render(), "a");
    }

    #[test]
    fn test_parse_group_filter() {
        assert_eq!(parse_group_filter("Sports, News ,,"), vec!["Sports", "News"]);
        assert!(parse_group_filter("").is_empty());
    }
}
