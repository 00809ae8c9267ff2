//! Static basic authentication.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Configured username and password. Either may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Credentials to enforce, or `None` when neither part is configured.
    #[must_use]
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        if username.is_none() && password.is_none() {
            return None;
        }
        Some(Self {
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
        })
    }

    /// Whether the request's `Authorization` header carries these credentials.
    #[must_use]
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };

        decoded
            .split_once(':')
            .is_some_and(|(user, pass)| user == self.username && pass == self.password)
    }

    /// `Authorization` header value for these credentials.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_unconfigured_is_none() {
        assert!(Credentials::from_parts(None, None).is_none());
        let only_user = Credentials::from_parts(Some("bot".into()), None).unwrap();
        assert_eq!(only_user.password, "");
    }

    #[test]
    fn test_verify() {
        let credentials = Credentials::from_parts(Some("bot".into()), Some("s:cret".into())).unwrap();

        assert!(credentials.verify(&headers(&credentials.header_value())));
        assert!(!credentials.verify(&HeaderMap::new()));
        assert!(!credentials.verify(&headers("Bearer abc")));
        assert!(!credentials.verify(&headers("Basic !!!")));

        let wrong = Credentials::from_parts(Some("bot".into()), Some("nope".into())).unwrap();
        assert!(!credentials.verify(&headers(&wrong.header_value())));
    }
}
