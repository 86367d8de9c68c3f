//! Xtream Codes URL Detection
//!
//! Recognizes M3U URLs served by an Xtream Codes panel.

use super::types::XtreamCredentials;
use crate::models::Credential;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Extract Xtream credentials from an M3U URL
///
/// Supported URL patterns:
/// - `http://server:port/get.php?username=X&password=Y&...`
/// - `http://server:port/get.php?username=X&password=Y&type=m3u_plus&output=ts`
///
/// # Returns
/// - `Some(XtreamCredentials)` if URL matches Xtream pattern
/// - `None` if URL is not an Xtream M3U URL
pub fn extract_credentials(m3u_url: &str) -> Option<XtreamCredentials> {
    let parsed = match Url::parse(m3u_url) {
        Ok(url) => url,
        Err(e) => {
            debug!("Failed to parse URL: {}", e);
            return None;
        }
    };

    // Check if it's a get.php endpoint (typical Xtream pattern)
    let path = parsed.path().to_lowercase();
    if !path.ends_with("/get.php") {
        return None;
    }

    let params: HashMap<_, _> = parsed.query_pairs().collect();

    // Must have both username and password
    let username = params.get("username")?.to_string();
    let password = params.get("password")?.to_string();

    if username.is_empty() || password.is_empty() {
        debug!("Empty username or password in URL");
        return None;
    }

    // Reconstruct server base URL
    let host = parsed.host_str()?;
    let port_suffix = parsed
        .port()
        .map(|p| format!(":{}", p))
        .unwrap_or_default();

    let server = format!("{}://{}{}", parsed.scheme(), host, port_suffix);

    Some(XtreamCredentials {
        server,
        username,
        password,
    })
}

/// Whether the configured M3U URL is the Xtream panel's own `get.php`.
///
/// True when the panel base URL contains the M3U URL's host and the panel
/// credentials equal the M3U URL's `username`/`password` query values.
pub fn is_xtream_alias(
    m3u_url: &str,
    xtream_base_url: &str,
    xtream_user: &Credential,
    xtream_password: &Credential,
) -> bool {
    let parsed = match Url::parse(m3u_url) {
        Ok(url) => url,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(host) => host,
        None => return false,
    };
    if xtream_base_url.is_empty() || !xtream_base_url.contains(host) {
        return false;
    }

    let params: HashMap<_, _> = parsed.query_pairs().collect();
    let query_user = params.get("username").map(|v| &**v);
    let query_password = params.get("password").map(|v| &**v);

    matches!(
        (query_user, query_password),
        (Some(u), Some(p)) if xtream_user.matches(u) && xtream_password.matches(p)
    )
}

/// Non-credential query parameters of the configured M3U URL
pub fn forwarded_query(m3u_url: &str) -> Vec<(String, String)> {
    Url::parse(m3u_url)
        .map(|url| {
            url.query_pairs()
                .filter(|(k, _)| k != "username" && k != "password")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_credentials_valid() {
        let url = "http://example.com:8080/get.php?username=testuser&password=testpass&type=m3u_plus&output=ts";
        let creds = extract_credentials(url).expect("Should extract credentials");

        assert_eq!(creds.server, "http://example.com:8080");
        assert_eq!(creds.username, "testuser");
        assert_eq!(creds.password, "testpass");
    }

    #[test]
    fn test_extract_credentials_https_no_port() {
        let url = "https://secure.example.com/get.php?username=user&password=pass";
        let creds = extract_credentials(url).expect("Should extract credentials");

        assert_eq!(creds.server, "https://secure.example.com");
    }

    #[test]
    fn test_extract_credentials_not_xtream() {
        assert!(extract_credentials("http://example.com/playlist.m3u").is_none());
        assert!(extract_credentials("http://example.com/api/streams?username=user&password=pass").is_none());
        assert!(extract_credentials("/srv/iptv/get.php").is_none());
    }

    #[test]
    fn test_extract_credentials_missing_params() {
        assert!(extract_credentials("http://example.com/get.php?username=user").is_none());
        assert!(extract_credentials("http://example.com/get.php?password=pass").is_none());
        assert!(extract_credentials("http://example.com/get.php?username=&password=pass").is_none());
    }

    #[test]
    fn test_alias_detection() {
        let m3u = "http://panel.example:8000/get.php?username=xu&password=xp&type=m3u_plus";
        let (xu, xp) = (Credential::new("xu"), Credential::new("xp"));

        assert!(is_xtream_alias(m3u, "http://panel.example:8000", &xu, &xp));
        assert!(!is_xtream_alias(m3u, "http://other.example", &xu, &xp));
        assert!(!is_xtream_alias(m3u, "http://panel.example:8000", &xu, &Credential::new("other")));
        assert!(!is_xtream_alias("http://panel.example/list.m3u", "http://panel.example", &xu, &xp));
    }

    #[test]
    fn test_forwarded_query() {
        let q = forwarded_query("http://panel.example/get.php?username=xu&password=xp&type=m3u_plus&output=ts");
        assert_eq!(
            q,
            vec![
                ("type".to_string(), "m3u_plus".to_string()),
                ("output".to_string(), "ts".to_string())
            ]
        );
    }
}
