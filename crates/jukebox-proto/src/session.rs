use std::fmt;

use thiserror::Error;
use url::Url;

/// Query parameter carrying the session token on the page URL and on the
/// websocket URL.
pub const TOKEN_PARAM: &str = "s";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid page url: {0}")]
    InvalidUrl(String),
    #[error("page url has no `s` parameter")]
    Missing,
    #[error("session token is empty")]
    Empty,
}

/// Opaque session token, read once from the page URL.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Result<Self, TokenError> {
        let token = token.into();
        if token.is_empty() {
            return Err(TokenError::Empty);
        }
        Ok(Self(token))
    }

    /// Extract the token from the `s` query parameter of a page URL.
    pub fn from_page_url(page_url: &str) -> Result<Self, TokenError> {
        let url = Url::parse(page_url).map_err(|e| TokenError::InvalidUrl(e.to_string()))?;
        let token = url
            .query_pairs()
            .find(|(key, _)| key == TOKEN_PARAM)
            .map(|(_, value)| value.into_owned())
            .ok_or(TokenError::Missing)?;
        Self::new(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep tokens out of logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(<{} chars>)", self.0.chars().count())
    }
}

/// `wss://<host>/ws?s=<token>` (or `ws://` when `secure` is off).
pub fn connection_url(host: &str, secure: bool, token: &SessionToken) -> anyhow::Result<Url> {
    let scheme = if secure { "wss" } else { "ws" };
    let mut url = Url::parse(&format!("{}://{}/ws", scheme, host))?;
    url.query_pairs_mut().append_pair(TOKEN_PARAM, token.as_str());
    Ok(url)
}
