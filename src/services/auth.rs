use std::collections::HashMap;

use crate::error::ProxyError;
use crate::models::Credential;

/// Parse `application/x-www-form-urlencoded` bytes into a map; later keys win
pub fn parse_form(bytes: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(bytes).into_owned().collect()
}

/// Static shared-secret check against the configured proxy credentials
#[derive(Debug, Clone)]
pub struct AuthGate {
    user: Credential,
    password: Credential,
}

impl AuthGate {
    pub fn new(user: Credential, password: Credential) -> Self {
        Self { user, password }
    }

    /// Missing field is a 400, mismatch a 401
    pub fn check(&self, username: Option<&str>, password: Option<&str>) -> Result<(), ProxyError> {
        let (username, password) = match (username, password) {
            (Some(u), Some(p)) => (u, p),
            _ => return Err(ProxyError::MissingCredentials),
        };

        if self.user.matches(username) && self.password.matches(password) {
            Ok(())
        } else {
            Err(ProxyError::Unauthorized)
        }
    }

    /// Query-string or form-field variant
    pub fn check_params(&self, params: &HashMap<String, String>) -> Result<(), ProxyError> {
        self.check(
            params.get("username").map(String::as_str),
            params.get("password").map(String::as_str),
        )
    }

    /// Buffered URL-encoded body variant. The caller keeps the bytes for the
    /// next stage; the returned map is what was parsed from them.
    pub fn check_body(&self, body: &[u8]) -> Result<HashMap<String, String>, ProxyError> {
        let params = parse_form(body);
        self.check_params(&params)?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new("u".into(), "p".into())
    }

    #[test]
    fn test_check() {
        assert!(gate().check(Some("u"), Some("p")).is_ok());
        assert!(matches!(gate().check(Some("u"), Some("x")), Err(ProxyError::Unauthorized)));
        assert!(matches!(gate().check(Some("U"), Some("p")), Err(ProxyError::Unauthorized)));
        assert!(matches!(gate().check(None, Some("p")), Err(ProxyError::MissingCredentials)));
        assert!(matches!(gate().check(Some("u"), None), Err(ProxyError::MissingCredentials)));
    }

    #[test]
    fn test_check_body_returns_replayable_params() {
        let body = b"username=u&password=p&action=get_live_categories";
        let params = gate().check_body(body).unwrap();
        assert_eq!(params.get("action").map(String::as_str), Some("get_live_categories"));
        // Bytes are untouched and parse the same way again
        assert_eq!(parse_form(body), params);
    }

    #[test]
    fn test_check_body_encoded_values() {
        let gate = AuthGate::new("a b".into(), "p&q".into());
        assert!(gate.check_body(b"username=a+b&password=p%26q").is_ok());
        assert!(gate.check_body(b"username=a+b").is_err());
    }

    #[test]
    fn test_empty_credentials_accept_empty_values() {
        let gate = AuthGate::new("".into(), "".into());
        assert!(gate.check(Some(""), Some("")).is_ok());
        assert!(gate.check(None, None).is_err());
    }
}
