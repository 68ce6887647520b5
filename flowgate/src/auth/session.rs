//! Session cookies: reading the token pair from a request and writing `Set-Cookie` headers.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, SET_COOKIE},
};
use bon::Builder;
use serde::Deserialize;
use std::{fmt, time::Duration};

use crate::config::{CookieConfig, SameSite};

/// A freshly issued access/refresh pair.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

// Tokens are bearer credentials and must never end up in logs
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Tokens presented by the caller. Either may be absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access", &self.access.as_ref().map(|_| "<redacted>"))
            .field("refresh", &self.refresh.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SessionTokens {
    /// Read the access and refresh cookies from every `Cookie` header on the request.
    ///
    /// Empty values are treated as absent, so a cookie cleared by an earlier response that a client
    /// still echoes back does not count as a credential.
    pub fn from_headers(headers: &HeaderMap, config: &CookieConfig) -> Self {
        Self {
            access: read_cookie(headers, &config.access_name),
            refresh: read_cookie(headers, &config.refresh_name),
        }
    }
}

/// Find the first non-empty value of the named cookie.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// One `Set-Cookie` header, with every attribute as an explicit field.
#[derive(Debug, Clone, Builder)]
pub struct SessionCookie {
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub value: String,
    #[builder(into, default = "/".to_string())]
    pub path: String,
    #[builder(into)]
    pub domain: Option<String>,
    #[builder(default = true)]
    pub http_only: bool,
    #[builder(default = true)]
    pub secure: bool,
    pub same_site: Option<SameSite>,
    pub max_age: Option<Duration>,
}

impl SessionCookie {
    /// Cookie carrying `value` for `max_age`, with the attributes from config.
    pub fn issued(name: &str, value: &str, max_age: Duration, config: &CookieConfig) -> Self {
        SessionCookie::builder()
            .name(name)
            .value(value)
            .maybe_domain(config.domain.clone())
            .secure(config.secure)
            .same_site(config.same_site)
            .max_age(max_age)
            .build()
    }

    /// Cookie that makes the browser drop `name` immediately.
    pub fn cleared(name: &str, config: &CookieConfig) -> Self {
        Self::issued(name, "", Duration::ZERO, config)
    }
}

impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.path)?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={same_site}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age.as_secs())?;
        }
        Ok(())
    }
}

/// Cookies installing a newly issued pair (access 30 minutes, refresh 24 hours by default).
pub fn issue_cookies(pair: &TokenPair, config: &CookieConfig) -> [SessionCookie; 2] {
    [
        SessionCookie::issued(&config.access_name, &pair.access, config.access_max_age, config),
        SessionCookie::issued(&config.refresh_name, &pair.refresh, config.refresh_max_age, config),
    ]
}

/// Cookies removing both session tokens.
pub fn clear_cookies(config: &CookieConfig) -> [SessionCookie; 2] {
    [
        SessionCookie::cleared(&config.access_name, config),
        SessionCookie::cleared(&config.refresh_name, config),
    ]
}

/// Append each cookie as its own `Set-Cookie` line.
pub fn append_set_cookies(headers: &mut HeaderMap, cookies: &[SessionCookie]) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            // Only reachable with a token containing control characters
            Err(_) => tracing::warn!("Dropping malformed value for cookie {}", cookie.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_issued_cookie_format() {
        let config = CookieConfig::default();
        let cookie = SessionCookie::issued("access", "tok", Duration::from_secs(1800), &config);

        assert_eq!(
            cookie.to_string(),
            "access=tok; Path=/; Domain=flowssync.com; HttpOnly; Secure; SameSite=None; Max-Age=1800"
        );
    }

    #[test]
    fn test_cleared_cookie_format() {
        let config = CookieConfig::default();
        let cookie = SessionCookie::cleared("refresh", &config);

        assert_eq!(
            cookie.to_string(),
            "refresh=; Path=/; Domain=flowssync.com; HttpOnly; Secure; SameSite=None; Max-Age=0"
        );
    }

    #[test]
    fn test_builder_defaults_and_optional_attributes() {
        let cookie = SessionCookie::builder().name("a").value("b").http_only(false).build();
        assert_eq!(cookie.to_string(), "a=b; Path=/; Secure");
    }

    #[test]
    fn test_issue_cookies_uses_configured_lifetimes() {
        let config = CookieConfig::default();
        let pair = TokenPair {
            access: "new-access".to_string(),
            refresh: "new-refresh".to_string(),
        };

        let [access, refresh] = issue_cookies(&pair, &config);
        assert_eq!(access.name, "access");
        assert_eq!(access.value, "new-access");
        assert_eq!(access.max_age, Some(Duration::from_secs(1800)));
        assert_eq!(refresh.name, "refresh");
        assert_eq!(refresh.value, "new-refresh");
        assert_eq!(refresh.max_age, Some(Duration::from_secs(86400)));
    }

    #[test]
    fn test_append_set_cookies_emits_separate_headers() {
        let config = CookieConfig::default();
        let mut headers = HeaderMap::new();
        append_set_cookies(&mut headers, &clear_cookies(&config));

        let values: Vec<_> = headers.get_all(SET_COOKIE).iter().map(|v| v.to_str().unwrap().to_string()).collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].starts_with("access=;"));
        assert!(values[1].starts_with("refresh=;"));
        assert!(values.iter().all(|v| v.ends_with("Max-Age=0")));
    }

    #[test]
    fn test_read_cookie() {
        let headers = headers_with_cookie("theme=dark; access=abc; refresh=def");
        assert_eq!(read_cookie(&headers, "access").as_deref(), Some("abc"));
        assert_eq!(read_cookie(&headers, "refresh").as_deref(), Some("def"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_read_cookie_ignores_prefix_matches_and_empty_values() {
        let headers = headers_with_cookie("access_old=zzz; access=");
        assert_eq!(read_cookie(&headers, "access"), None);
    }

    #[test]
    fn test_read_cookie_across_multiple_headers() {
        let mut headers = headers_with_cookie("access=abc");
        headers.append(COOKIE, HeaderValue::from_static("refresh=def"));

        let tokens = SessionTokens::from_headers(&headers, &CookieConfig::default());
        assert_eq!(tokens.access.as_deref(), Some("abc"));
        assert_eq!(tokens.refresh.as_deref(), Some("def"));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let pair = TokenPair {
            access: "secret-a".to_string(),
            refresh: "secret-r".to_string(),
        };
        let debug = format!("{pair:?}");
        assert!(!debug.contains("secret"));
    }
}
