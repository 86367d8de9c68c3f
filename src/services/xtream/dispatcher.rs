use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::config::Config;
use crate::error::ProxyError;
use crate::services::xtream::XtreamClient;

/// Closed set of `player_api.php` actions the proxy understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XtreamAction {
    /// Absent or empty `action`
    Login,
    GetLiveCategories,
    GetLiveStreams { category_id: Option<String> },
    GetVodCategories,
    GetVodStreams { category_id: Option<String> },
    GetVodInfo { vod_id: String },
    GetSeriesCategories,
    GetSeries { category_id: Option<String> },
    GetSeriesInfo { series_id: String },
    GetShortEpg { stream_id: String, limit: Option<u32> },
    GetSimpleDataTable { stream_id: String },
}

fn required(params: &HashMap<String, String>, field: &'static str) -> Result<String, ProxyError> {
    params
        .get(field)
        .map(|v| v.to_string())
        .ok_or(ProxyError::MissingParameter(field))
}

impl XtreamAction {
    /// Validate the action and its required identifiers before any upstream call
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ProxyError> {
        let action = params.get("action").map(String::as_str).unwrap_or_default();
        let category_id = || params.get("category_id").cloned();

        let parsed = match action {
            "" => XtreamAction::Login,
            "get_live_categories" => XtreamAction::GetLiveCategories,
            "get_live_streams" => XtreamAction::GetLiveStreams {
                category_id: category_id(),
            },
            "get_vod_categories" => XtreamAction::GetVodCategories,
            "get_vod_streams" => XtreamAction::GetVodStreams {
                category_id: category_id(),
            },
            "get_vod_info" => XtreamAction::GetVodInfo {
                vod_id: required(params, "vod_id")?,
            },
            "get_series_categories" => XtreamAction::GetSeriesCategories,
            "get_series" => XtreamAction::GetSeries {
                category_id: category_id(),
            },
            "get_series_info" => XtreamAction::GetSeriesInfo {
                series_id: required(params, "series_id")?,
            },
            "get_short_epg" => {
                let stream_id = required(params, "stream_id")?;
                let limit = match params.get("limit").map(|l| l.trim()).filter(|l| !l.is_empty()) {
                    Some(l) => Some(l.parse().map_err(|_| ProxyError::InvalidParameter("limit"))?),
                    None => None,
                };
                XtreamAction::GetShortEpg { stream_id, limit }
            }
            "get_simple_data_table" => XtreamAction::GetSimpleDataTable {
                stream_id: required(params, "stream_id")?,
            },
            other => return Err(ProxyError::UnsupportedAction(other.to_string())),
        };
        Ok(parsed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            XtreamAction::Login => "login",
            XtreamAction::GetLiveCategories => "get_live_categories",
            XtreamAction::GetLiveStreams { .. } => "get_live_streams",
            XtreamAction::GetVodCategories => "get_vod_categories",
            XtreamAction::GetVodStreams { .. } => "get_vod_streams",
            XtreamAction::GetVodInfo { .. } => "get_vod_info",
            XtreamAction::GetSeriesCategories => "get_series_categories",
            XtreamAction::GetSeries { .. } => "get_series",
            XtreamAction::GetSeriesInfo { .. } => "get_series_info",
            XtreamAction::GetShortEpg { .. } => "get_short_epg",
            XtreamAction::GetSimpleDataTable { .. } => "get_simple_data_table",
        }
    }
}

/// Public identity the login response advertises instead of the panel's
#[derive(Debug, Clone)]
pub struct ProxyIdentity {
    pub user: String,
    pub password: String,
    pub hostname: String,
    pub port: u16,
    pub scheme: &'static str,
}

impl ProxyIdentity {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user: config.user.render().to_string(),
            password: config.password.render().to_string(),
            hostname: config.hostname.clone(),
            port: config.advertised_port,
            scheme: config.scheme(),
        }
    }
}

fn object(value: Option<&Value>) -> Map<String, Value> {
    value
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Echo the panel's `user_info`/`server_info`, pointing clients at the proxy
pub fn synthesize_login(upstream: &Value, identity: &ProxyIdentity) -> Value {
    let mut user_info = object(upstream.get("user_info"));
    user_info.insert("username".into(), json!(identity.user));
    user_info.insert("password".into(), json!(identity.password));

    let port = identity.port.to_string();
    let mut server_info = object(upstream.get("server_info"));
    server_info.insert(
        "url".into(),
        json!(format!("{}://{}", identity.scheme, identity.hostname)),
    );
    server_info.insert("port".into(), json!(port));
    server_info.insert("https_port".into(), json!(port));
    server_info.insert("rtmp_port".into(), json!(port));
    server_info.insert("server_protocol".into(), json!(identity.scheme));

    json!({
        "user_info": user_info,
        "server_info": server_info,
    })
}

/// Run one action against the panel
pub async fn dispatch(
    action: &XtreamAction,
    client: &XtreamClient,
    identity: &ProxyIdentity,
) -> Result<Value, ProxyError> {
    tracing::info!(action = action.name(), "Xtream action");

    let value = match action {
        XtreamAction::Login => synthesize_login(&client.login().await?, identity),
        XtreamAction::GetLiveCategories => client.get_live_categories().await?,
        XtreamAction::GetLiveStreams { category_id } => client.get_live_streams(category_id.as_deref()).await?,
        XtreamAction::GetVodCategories => client.get_vod_categories().await?,
        XtreamAction::GetVodStreams { category_id } => client.get_vod_streams(category_id.as_deref()).await?,
        XtreamAction::GetVodInfo { vod_id } => client.get_vod_info(vod_id).await?,
        XtreamAction::GetSeriesCategories => client.get_series_categories().await?,
        XtreamAction::GetSeries { category_id } => client.get_series(category_id.as_deref()).await?,
        XtreamAction::GetSeriesInfo { series_id } => client.get_series_info(series_id).await?,
        XtreamAction::GetShortEpg { stream_id, limit } => client.get_short_epg(stream_id, *limit).await?,
        XtreamAction::GetSimpleDataTable { stream_id } => client.get_simple_data_table(stream_id).await?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_default_is_login() {
        assert_eq!(XtreamAction::from_params(&params(&[])).unwrap(), XtreamAction::Login);
        assert_eq!(
            XtreamAction::from_params(&params(&[("action", "")])).unwrap(),
            XtreamAction::Login
        );
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = XtreamAction::from_params(&params(&[("action", "drop_tables")])).unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedAction(ref a) if a == "drop_tables"));
    }

    #[test]
    fn test_missing_identifiers() {
        for (action, field) in [
            ("get_vod_info", "vod_id"),
            ("get_series_info", "series_id"),
            ("get_short_epg", "stream_id"),
            ("get_simple_data_table", "stream_id"),
        ] {
            let err = XtreamAction::from_params(&params(&[("action", action)])).unwrap_err();
            assert!(matches!(err, ProxyError::MissingParameter(f) if f == field), "{}", action);
        }
    }

    #[test]
    fn test_short_epg_limit() {
        let action = XtreamAction::from_params(&params(&[
            ("action", "get_short_epg"),
            ("stream_id", "42"),
            ("limit", "5"),
        ]))
        .unwrap();
        assert_eq!(
            action,
            XtreamAction::GetShortEpg {
                stream_id: "42".into(),
                limit: Some(5)
            }
        );

        let err = XtreamAction::from_params(&params(&[
            ("action", "get_short_epg"),
            ("stream_id", "42"),
            ("limit", "five"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidParameter("limit")));
    }

    #[test]
    fn test_category_passthrough() {
        let action = XtreamAction::from_params(&params(&[
            ("action", "get_vod_streams"),
            ("category_id", "12"),
        ]))
        .unwrap();
        assert_eq!(
            action,
            XtreamAction::GetVodStreams {
                category_id: Some("12".into())
            }
        );
    }

    #[test]
    fn test_synthesize_login() {
        let upstream = json!({
            "user_info": {"username": "xu", "password": "xp", "status": "Active", "exp_date": "1999999999"},
            "server_info": {"url": "panel.example", "port": "8000", "https_port": "8443",
                            "server_protocol": "http", "rtmp_port": "8001", "timezone": "UTC"}
        });
        let identity = ProxyIdentity {
            user: "u".into(),
            password: "p".into(),
            hostname: "proxy.test".into(),
            port: 8080,
            scheme: "https",
        };

        let out = synthesize_login(&upstream, &identity);
        assert_eq!(out["user_info"]["username"], "u");
        assert_eq!(out["user_info"]["password"], "p");
        assert_eq!(out["user_info"]["status"], "Active");
        assert_eq!(out["server_info"]["url"], "https://proxy.test");
        assert_eq!(out["server_info"]["port"], "8080");
        assert_eq!(out["server_info"]["https_port"], "8080");
        assert_eq!(out["server_info"]["rtmp_port"], "8080");
        assert_eq!(out["server_info"]["server_protocol"], "https");
        assert_eq!(out["server_info"]["timezone"], "UTC");
        assert!(!out.to_string().contains("xu"));
        assert!(!out.to_string().contains("panel.example"));
    }
}
