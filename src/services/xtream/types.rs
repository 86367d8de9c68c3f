//! Xtream Codes API Types
//!
//! Only what the proxy reads itself is typed; everything it forwards to
//! clients stays `serde_json::Value` so unknown panel fields pass through.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Extracted credentials from M3U URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XtreamCredentials {
    /// Server base URL (e.g., "http://example.com:8080")
    pub server: String,
    /// Username for authentication
    pub username: String,
    /// Password for authentication
    pub password: String,
}

/// Panels disagree on whether ids are JSON strings or numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("unexpected id {}", other))),
    }
}

fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(string_or_number(deserializer)?).filter(|s| !s.is_empty()))
}

// ============================================================================
// Category Types
// ============================================================================

/// Category for live, VOD, or series
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct XtreamCategory {
    #[serde(deserialize_with = "string_or_number")]
    pub category_id: String,
    #[serde(default)]
    pub category_name: String,
}

// ============================================================================
// Live Stream Types
// ============================================================================

/// Live stream (channel) information
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct XtreamLiveStream {
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub stream_id: String,
    #[serde(default, deserialize_with = "opt_string")]
    pub stream_icon: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub epg_channel_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub category_id: Option<String>,
}
