#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod error;
pub mod realtime;
pub mod ws;

use std::sync::LazyLock;

use url::Url;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Default WebSocket endpoint of the realtime service.
pub const DEFAULT_WSS_API_URI: &str = "wss://realtime.kadoa.com";

/// Default HTTP endpoint of the public API, which hosts the token exchange.
pub const DEFAULT_PUBLIC_API_URI: &str = "https://api.kadoa.com";

/// Overrides [`DEFAULT_WSS_API_URI`] when set.
pub const WSS_API_URI_VAR: &str = "WSS_KADOA_API_URI";

/// Overrides [`DEFAULT_PUBLIC_API_URI`] when set.
pub const PUBLIC_API_URI_VAR: &str = "PUBLIC_KADOA_API_URI";

/// Team credential read by [`realtime::Client::from_env`].
pub const TEAM_API_KEY_VAR: &str = "KADOA_TEAM_API_KEY";

/// Base endpoints the client talks to.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Base of the public HTTP API, e.g. `https://api.kadoa.com/`
    pub public_api: Url,
    /// Base of the realtime WebSocket, e.g. `wss://realtime.kadoa.com/`
    pub websocket: Url,
}

impl Endpoints {
    /// Builds endpoints from explicit base URIs.
    pub fn new(public_api: &str, websocket: &str) -> Result<Self> {
        let endpoints = Self {
            public_api: as_base(Url::parse(public_api)?),
            websocket: Url::parse(websocket)?,
        };

        if !matches!(endpoints.websocket.scheme(), "ws" | "wss") {
            return Err(Error::configuration(format!(
                "websocket endpoint must use ws:// or wss://, got {}",
                endpoints.websocket
            )));
        }

        Ok(endpoints)
    }

    /// Reads [`WSS_API_URI_VAR`] and [`PUBLIC_API_URI_VAR`], falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str, default: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        Self::new(
            &read(PUBLIC_API_URI_VAR, DEFAULT_PUBLIC_API_URI),
            &read(WSS_API_URI_VAR, DEFAULT_WSS_API_URI),
        )
    }
}

static DEFAULT_ENDPOINTS: LazyLock<Endpoints> = LazyLock::new(|| {
    Endpoints::new(DEFAULT_PUBLIC_API_URI, DEFAULT_WSS_API_URI)
        .expect("default endpoints are valid URIs")
});

impl Default for Endpoints {
    fn default() -> Self {
        DEFAULT_ENDPOINTS.clone()
    }
}

/// Appends a trailing `/` to the path of `url`, so relative paths join beneath it
/// instead of replacing its last segment.
pub(crate) fn as_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
