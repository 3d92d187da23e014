//! WebSocket endpoint derivation.
//!
//! The socket endpoint is built from a page URL: the scheme is upgraded
//! (`http` -> `ws`, `https` -> `wss`), query and fragment are dropped, and a
//! fixed suffix path is resolved against the page path.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// Suffix resolved against the page URL to reach the socket.
pub const DEFAULT_SOCKET_PATH: &str = "ws";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid url: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("unsupported scheme {0:?} (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
}

/// A validated `ws://` or `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Derive the endpoint for a page URL using [`DEFAULT_SOCKET_PATH`].
    pub fn from_page_url(page: &str) -> Result<Self, EndpointError> {
        Self::from_page_url_with_path(page, DEFAULT_SOCKET_PATH)
    }

    /// Derive the endpoint for a page URL, resolving `suffix` against the
    /// page path. A relative suffix lands next to the page, an absolute one
    /// (`/ws`) replaces the path.
    pub fn from_page_url_with_path(page: &str, suffix: &str) -> Result<Self, EndpointError> {
        Self::from_page(Url::parse(page)?, suffix)
    }

    /// Take a `ws`/`wss` URL as is; derive from anything else as a page URL.
    /// The scheme is compared after parsing, so `WS://` counts as a socket URL.
    pub fn resolve(input: &str, suffix: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            _ => Self::from_page(url, suffix),
        }
    }

    fn from_page(mut base: Url, suffix: &str) -> Result<Self, EndpointError> {
        let scheme = socket_scheme(base.scheme())?;
        base.set_query(None);
        base.set_fragment(None);

        let mut url = base.join(suffix)?;
        url.set_query(None);
        url.set_fragment(None);
        url.set_scheme(scheme)
            .map_err(|()| EndpointError::UnsupportedScheme(base.scheme().to_owned()))?;
        Ok(Self { url })
    }

    /// Parse a URL that already uses the `ws` or `wss` scheme.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(EndpointError::UnsupportedScheme(other.to_owned())),
        }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

fn socket_scheme(page_scheme: &str) -> Result<&'static str, EndpointError> {
    match page_scheme {
        "http" | "ws" => Ok("ws"),
        "https" | "wss" => Ok("wss"),
        other => Err(EndpointError::UnsupportedScheme(other.to_owned())),
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_page_url(s)
    }
}
