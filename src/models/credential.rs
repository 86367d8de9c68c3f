use std::fmt;

/// A user supplied credential (username or password).
///
/// Any string is accepted, including the empty one. `Debug` is redacted so
/// the value never ends up in logs by accident.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Percent-encode for insertion into a single URL path segment
    pub fn escape_for_path(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }

    /// Plain form, used for comparisons and upstream query strings
    pub fn render(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Exact byte-for-byte comparison against a client supplied value
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.as_bytes() == candidate.as_bytes()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Credential(<empty>)")
        } else {
            f.write_str("Credential(***)")
        }
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Mask credentials in a URL before it reaches the logs: userinfo password,
/// `username`/`password` query values and any path segment equal to one of
/// `secrets`.
pub fn redact_url(raw: &str, secrets: &[&Credential]) -> String {
    let mut url = match url::Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return "<unparseable url>".to_string(),
    };

    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }

    if url.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let masked = if k == "username" || k == "password" {
                    "***".to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), masked)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let escaped: Vec<String> = secrets
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.escape_for_path())
        .collect();
    if !escaped.is_empty() {
        let path: Vec<&str> = url
            .path()
            .split('/')
            .map(|seg| if escaped.iter().any(|e| e == seg) { "***" } else { seg })
            .collect();
        let path = path.join("/");
        url.set_path(&path);
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        let user = Credential::new("xu");
        let pass = Credential::new("xp");
        let redacted = redact_url(
            "http://a:b@panel.example/live/xu/xp/42.ts?username=xu&password=xp&type=m3u",
            &[&user, &pass],
        );
        assert!(!redacted.contains("xu"));
        assert!(!redacted.contains("xp"));
        assert!(!redacted.contains(":b@"));
        assert!(redacted.contains("type=m3u"));
        assert!(redacted.contains("/live/***/***/42.ts"));
    }

    #[test]
    fn test_escape_for_path() {
        let cred = Credential::new("p@ss/word ok");
        assert_eq!(cred.escape_for_path(), "p%40ss%2Fword%20ok");
        assert_eq!(cred.render(), "p@ss/word ok");
    }

    #[test]
    fn test_empty_is_accepted() {
        let cred = Credential::new("");
        assert!(cred.is_empty());
        assert!(cred.matches(""));
        assert!(!cred.matches("x"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let cred = Credential::new("secret");
        assert!(!format!("{:?}", cred).contains("secret"));
    }
}
