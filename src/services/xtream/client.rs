//! Xtream Codes API Client
//!
//! HTTP client for the upstream panel's Player API v2. Responses the proxy
//! forwards are returned as raw JSON values.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use super::types::{XtreamCategory, XtreamLiveStream};
use crate::models::Credential;

/// Xtream API Error types
#[derive(Debug, Error)]
pub enum XtreamError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error: {0}")]
    Http(u16),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Empty response")]
    EmptyResponse,
    #[error("Invalid panel URL: {0}")]
    Url(String),
}

impl From<reqwest::Error> for XtreamError {
    fn from(err: reqwest::Error) -> Self {
        XtreamError::Network(err.without_url().to_string())
    }
}

/// Xtream API Client
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct XtreamClient {
    http: Client,
    server: String,
    username: Credential,
    password: Credential,
    user_agent: Option<String>,
}

impl XtreamClient {
    /// Create a new Xtream client
    ///
    /// # Arguments
    /// * `http` - Shared HTTP client (timeouts already applied)
    /// * `server` - Server base URL (e.g., "http://example.com:8080")
    pub fn new(http: Client, server: &str, username: Credential, password: Credential) -> Self {
        Self {
            http,
            server: server.trim_end_matches('/').to_string(),
            username,
            password,
            user_agent: None,
        }
    }

    /// Same panel, requests sent with the inbound client's user agent
    pub fn with_user_agent(&self, user_agent: Option<&str>) -> Self {
        let mut client = self.clone();
        client.user_agent = user_agent.map(str::to_string);
        client
    }

    fn endpoint(&self, script: &str, params: &[(&str, String)]) -> Result<Url, XtreamError> {
        let mut url = Url::parse(&format!("{}/{}", self.server, script))
            .map_err(|e| XtreamError::Url(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("username", self.username.render());
            query.append_pair("password", self.password.render());
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, url: Url) -> Result<reqwest::Response, XtreamError> {
        let mut request = self.http.get(url);
        if let Some(ua) = &self.user_agent {
            request = request.header(reqwest::header::USER_AGENT, ua.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(XtreamError::Http(status.as_u16()));
        }
        Ok(response)
    }

    /// Make a player_api.php request with optional action and parameters
    async fn get_json(&self, action: &str, params: &[(&str, String)]) -> Result<Value, XtreamError> {
        let mut all = Vec::with_capacity(params.len() + 1);
        if !action.is_empty() {
            all.push(("action", action.to_string()));
        }
        all.extend(params.iter().cloned());

        debug!("Xtream API request: {}", action);
        let text = self.send(self.endpoint("player_api.php", &all)?).await?.text().await?;

        if text.trim().is_empty() {
            return Err(XtreamError::EmptyResponse);
        }

        serde_json::from_str(&text).map_err(|e| {
            error!("Failed to parse Xtream response for action '{}': {}", action, e);
            XtreamError::Parse(e.to_string())
        })
    }

    async fn get<T: DeserializeOwned>(&self, action: &str, params: &[(&str, String)]) -> Result<T, XtreamError> {
        let value = self.get_json(action, params).await?;
        serde_json::from_value(value).map_err(|e| XtreamError::Parse(e.to_string()))
    }

    fn category(category_id: Option<&str>) -> Vec<(&'static str, String)> {
        category_id
            .filter(|c| !c.is_empty())
            .map(|c| vec![("category_id", c.to_string())])
            .unwrap_or_default()
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Get authentication info (user_info + server_info)
    pub async fn login(&self) -> Result<Value, XtreamError> {
        self.get_json("", &[]).await
    }

    // ========================================================================
    // Live
    // ========================================================================

    pub async fn get_live_categories(&self) -> Result<Value, XtreamError> {
        self.get_json("get_live_categories", &[]).await
    }

    pub async fn get_live_streams(&self, category_id: Option<&str>) -> Result<Value, XtreamError> {
        self.get_json("get_live_streams", &Self::category(category_id)).await
    }

    /// Typed live categories, used to generate playlists
    pub async fn live_categories(&self) -> Result<Vec<XtreamCategory>, XtreamError> {
        self.get("get_live_categories", &[]).await
    }

    /// Typed live streams of one category, used to generate playlists
    pub async fn live_streams(&self, category_id: &str) -> Result<Vec<XtreamLiveStream>, XtreamError> {
        self.get("get_live_streams", &Self::category(Some(category_id))).await
    }

    // ========================================================================
    // VOD (Movies)
    // ========================================================================

    pub async fn get_vod_categories(&self) -> Result<Value, XtreamError> {
        self.get_json("get_vod_categories", &[]).await
    }

    pub async fn get_vod_streams(&self, category_id: Option<&str>) -> Result<Value, XtreamError> {
        self.get_json("get_vod_streams", &Self::category(category_id)).await
    }

    pub async fn get_vod_info(&self, vod_id: &str) -> Result<Value, XtreamError> {
        self.get_json("get_vod_info", &[("vod_id", vod_id.to_string())]).await
    }

    // ========================================================================
    // Series
    // ========================================================================

    pub async fn get_series_categories(&self) -> Result<Value, XtreamError> {
        self.get_json("get_series_categories", &[]).await
    }

    pub async fn get_series(&self, category_id: Option<&str>) -> Result<Value, XtreamError> {
        self.get_json("get_series", &Self::category(category_id)).await
    }

    pub async fn get_series_info(&self, series_id: &str) -> Result<Value, XtreamError> {
        self.get_json("get_series_info", &[("series_id", series_id.to_string())]).await
    }

    // ========================================================================
    // EPG
    // ========================================================================

    /// Get short EPG for a stream (next ~4 hours)
    pub async fn get_short_epg(&self, stream_id: &str, limit: Option<u32>) -> Result<Value, XtreamError> {
        let mut params = vec![("stream_id", stream_id.to_string())];
        if let Some(l) = limit {
            params.push(("limit", l.to_string()));
        }
        self.get_json("get_short_epg", &params).await
    }

    /// Full EPG table for one stream
    pub async fn get_simple_data_table(&self, stream_id: &str) -> Result<Value, XtreamError> {
        self.get_json("get_simple_data_table", &[("stream_id", stream_id.to_string())])
            .await
    }

    /// Raw XMLTV document
    pub async fn get_xmltv(&self) -> Result<Vec<u8>, XtreamError> {
        let response = self.send(self.endpoint("xmltv.php", &[])?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Upstream `get.php` URL with the forwarded query parameters
    pub fn get_php_url(&self, params: &[(String, String)]) -> Result<Url, XtreamError> {
        let forwarded: Vec<(&str, String)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        self.endpoint("get.php", &forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &str) -> XtreamClient {
        XtreamClient::new(Client::new(), server, "xu".into(), "x&p".into())
    }

    #[test]
    fn test_get_php_url() {
        let client = client("http://example.com:8080/");
        let url = client
            .get_php_url(&[("type".to_string(), "m3u_plus".to_string())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://example.com:8080/get.php?username=xu&password=x%26p&type=m3u_plus"
        );
    }

    #[tokio::test]
    async fn test_action_with_category_and_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/player_api.php"))
            .and(query_param("username", "xu"))
            .and(query_param("password", "x&p"))
            .and(query_param("action", "get_live_streams"))
            .and(query_param("category_id", "3"))
            .and(header("user-agent", "TiviMate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"stream_id": 1}]"#))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server.uri())
            .with_user_agent(Some("TiviMate"))
            .get_live_streams(Some("3"))
            .await
            .unwrap();
        assert_eq!(value[0]["stream_id"], 1);
    }

    #[tokio::test]
    async fn test_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server.uri()).login().await.unwrap_err();
        assert!(matches!(err, XtreamError::Http(503)));
    }
}
