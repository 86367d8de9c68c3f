use std::collections::HashMap;

use crate::services::auth::parse_form;

/// Request parameters from the query string and an URL-encoded body, in
/// arrival order. Body fields come after query fields.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

fn is_credential(key: &str) -> bool {
    key == "username" || key == "password"
}

impl RequestParams {
    pub fn from_parts(query: Option<&str>, body: &[u8]) -> Self {
        let mut pairs: Vec<(String, String)> = query
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        pairs.extend(url::form_urlencoded::parse(body).into_owned());
        Self { pairs }
    }

    /// Last value wins
    pub fn map(&self) -> HashMap<String, String> {
        self.pairs.iter().cloned().collect()
    }

    /// Everything except `username`/`password`, for upstream forwarding
    pub fn forwarded(&self) -> Vec<(String, String)> {
        self.pairs
            .iter()
            .filter(|(k, _)| !is_credential(k))
            .cloned()
            .collect()
    }

    /// Append pairs not already present, keeping existing values
    pub fn merge_missing(&mut self, extra: Vec<(String, String)>) {
        for (key, value) in extra {
            if !self.pairs.iter().any(|(k, _)| *k == key) {
                self.pairs.push((key, value));
            }
        }
    }
}

/// Merge a body already parsed by the auth gate over the query string
pub fn with_body(query: Option<&str>, body_params: HashMap<String, String>) -> HashMap<String, String> {
    let mut params = query.map(|q| parse_form(q.as_bytes())).unwrap_or_default();
    params.extend(body_params);
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_and_body() {
        let params = RequestParams::from_parts(
            Some("username=u&password=p&type=m3u_plus"),
            b"output=ts&type=m3u",
        );
        let map = params.map();
        assert_eq!(map["username"], "u");
        assert_eq!(map["type"], "m3u");
        assert_eq!(
            params.forwarded(),
            vec![
                ("type".to_string(), "m3u_plus".to_string()),
                ("output".to_string(), "ts".to_string()),
                ("type".to_string(), "m3u".to_string()),
            ]
        );
    }

    #[test]
    fn test_merge_missing() {
        let mut params = RequestParams::from_parts(Some("username=u&password=p&output=m3u8"), b"");
        params.merge_missing(vec![
            ("type".to_string(), "m3u_plus".to_string()),
            ("output".to_string(), "ts".to_string()),
        ]);
        let map = params.map();
        assert_eq!(map["output"], "m3u8");
        assert_eq!(map["type"], "m3u_plus");
    }

    #[test]
    fn test_with_body_overrides_query() {
        let mut body = HashMap::new();
        body.insert("action".to_string(), "get_live_categories".to_string());
        let merged = with_body(Some("action=get_vod_categories&x=1"), body);
        assert_eq!(merged["action"], "get_live_categories");
        assert_eq!(merged["x"], "1");
    }
}
