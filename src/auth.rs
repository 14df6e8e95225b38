//! Credentials and the OAuth2 token exchange that precedes every realtime connection.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as ReqwestClient, Method};
/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::{Result, TEAM_API_KEY_VAR};

/// Path of the token exchange, relative to the public API host.
pub const TOKEN_PATH: &str = "v4/oauth2/token";

/// Long-lived credentials used to obtain short-lived realtime access tokens.
///
/// At least one of `api_key` or `team_api_key` must be present. When both are supplied, the
/// team key is the one presented to the token endpoint.
#[derive(Clone, Debug)]
pub struct Credentials {
    api_key: Option<SecretString>,
    team_api_key: Option<SecretString>,
    bearer: SecretString,
}

impl Credentials {
    /// Creates credentials, failing with [`crate::error::Kind::Configuration`] when neither key
    /// is supplied. Empty or whitespace-only keys count as absent.
    pub fn new(api_key: Option<String>, team_api_key: Option<String>) -> Result<Self> {
        let api_key = non_blank(api_key);
        let team_api_key = non_blank(team_api_key);

        let bearer = team_api_key
            .clone()
            .or_else(|| api_key.clone())
            .ok_or_else(|| Error::configuration("api_key or team_api_key must be passed"))?;

        Ok(Self {
            api_key,
            team_api_key,
            bearer,
        })
    }

    /// Credentials holding only a team API key.
    pub fn team<S: Into<String>>(team_api_key: S) -> Result<Self> {
        Self::new(None, Some(team_api_key.into()))
    }

    /// Reads the team key from [`TEAM_API_KEY_VAR`].
    pub fn from_env() -> Result<Self> {
        Self::new(None, std::env::var(TEAM_API_KEY_VAR).ok())
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }

    #[must_use]
    pub fn team_api_key(&self) -> Option<&SecretString> {
        self.team_api_key.as_ref()
    }

    /// The credential sent as the bearer token of the exchange.
    pub(crate) fn bearer(&self) -> &SecretString {
        &self.bearer
    }
}

fn non_blank(key: Option<String>) -> Option<SecretString> {
    key.filter(|k| !k.trim().is_empty()).map(SecretString::from)
}

/// Result of a successful token exchange. Valid for a single connection attempt.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
pub struct Session {
    /// Short-lived token embedded in the socket URI
    pub access_token: SecretString,
    /// Identifier of the team, used as the subscription channel
    pub team_id: String,
}

impl Session {
    /// Builds `{websocket}?access_token=<token>`.
    #[must_use]
    pub fn socket_url(&self, websocket: &Url) -> Url {
        let mut url = websocket.clone();
        url.query_pairs_mut()
            .append_pair("access_token", self.access_token.expose_secret());
        url
    }
}

/// Trades the long-lived credential for a [`Session`].
///
/// The token path is resolved beneath `host`, keeping any path prefix it carries. Every
/// failure (transport, non-2xx status, undecodable body) is reported as
/// [`crate::error::Kind::Authentication`].
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip_all,
        fields(host = %host, status_code)
    )
)]
pub async fn exchange_token(
    client: &ReqwestClient,
    host: &Url,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<Session> {
    let url = crate::as_base(host.clone()).join(TOKEN_PATH)?;

    let response = client
        .request(Method::POST, url.clone())
        .bearer_auth(credentials.bearer().expose_secret())
        .header(CONTENT_TYPE, "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(Error::authentication)?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(status = %status_code, message = %message, "Token exchange failed");

        return Err(Error::status(
            status_code,
            Method::POST,
            url.path().to_owned(),
            message,
        ));
    }

    let body = response.bytes().await.map_err(Error::authentication)?;
    let session: Session = serde_json::from_slice(&body).map_err(Error::authentication)?;

    Ok(session)
}
