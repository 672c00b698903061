//! Anti-forgery token sources for mutating requests

use reqwest::cookie::{CookieStore, Jar};
use std::sync::Arc;
use url::Url;

/// Yields the current anti-forgery token, if any
pub trait CsrfTokenSource: Send + Sync {
    fn csrf_token(&self) -> Option<String>;
}

/// Fixed token, e.g. read once from a page meta tag
#[derive(Debug, Clone, Default)]
pub struct StaticCsrfToken(Option<String>);

impl StaticCsrfToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub const fn none() -> Self {
        Self(None)
    }
}

impl CsrfTokenSource for StaticCsrfToken {
    fn csrf_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from a cookie the server set in the gateway's cookie jar
#[derive(Debug, Clone)]
pub struct CookieCsrfSource {
    jar: Arc<Jar>,
    url: Url,
    cookie_name: String,
}

impl CookieCsrfSource {
    pub fn new(jar: Arc<Jar>, url: Url, cookie_name: impl Into<String>) -> Self {
        Self {
            jar,
            url,
            cookie_name: cookie_name.into(),
        }
    }
}

impl CsrfTokenSource for CookieCsrfSource {
    fn csrf_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.url)?;
        let cookies = header.to_str().ok()?;
        cookies
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }
}
