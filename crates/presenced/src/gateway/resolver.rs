//! Gateway endpoint discovery.

use std::future::Future;
use std::time::Duration;

use presence_proto::{GATEWAY_ENCODING, GATEWAY_VERSION};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::DiscoveryError;

const USER_AGENT: &str = concat!("presenced/", env!("CARGO_PKG_VERSION"));

/// Resolves the WebSocket URL to connect to.
///
/// Implementations make a single attempt; retrying is the caller's job.
pub trait EndpointResolver: Send + Sync {
    /// Resolve the connection URL, including the version/encoding query.
    fn resolve(&self) -> impl Future<Output = Result<Url, DiscoveryError>> + Send;
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    url: String,
}

/// Resolver that asks the discovery HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    discovery_url: String,
}

impl HttpResolver {
    /// Create a resolver for `discovery_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(discovery_url: impl Into<String>, timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DiscoveryError::Request(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            discovery_url: discovery_url.into(),
        })
    }

    /// The discovery endpoint.
    #[must_use]
    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }
}

impl EndpointResolver for HttpResolver {
    async fn resolve(&self) -> Result<Url, DiscoveryError> {
        debug!(discovery_url = %self.discovery_url, "resolving gateway endpoint");

        let response = self
            .client
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| DiscoveryError::Request(e.to_string()))?;

        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

        gateway_connection_url(&body.url)
    }
}

/// Resolver that always returns a fixed URL.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    url: Url,
}

impl StaticResolver {
    /// Create a resolver for `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a ws:// or wss:// URL.
    pub fn new(url: &str) -> Result<Self, DiscoveryError> {
        Ok(Self {
            url: gateway_connection_url(url)?,
        })
    }
}

impl EndpointResolver for StaticResolver {
    async fn resolve(&self) -> Result<Url, DiscoveryError> {
        Ok(self.url.clone())
    }
}

/// Resolver chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnyResolver {
    /// Discovery over HTTP.
    Http(HttpResolver),
    /// Fixed URL.
    Static(StaticResolver),
}

impl EndpointResolver for AnyResolver {
    async fn resolve(&self) -> Result<Url, DiscoveryError> {
        match self {
            Self::Http(resolver) => resolver.resolve().await,
            Self::Static(resolver) => resolver.resolve().await,
        }
    }
}

/// Turn an advertised gateway URL into a connection URL with the
/// `v` and `encoding` query parameters set.
///
/// # Errors
///
/// Returns an error if the URL does not parse or is not ws/wss.
pub fn gateway_connection_url(raw: &str) -> Result<Url, DiscoveryError> {
    let mut url = Url::parse(raw).map_err(|e| DiscoveryError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(DiscoveryError::InvalidUrl {
            url: raw.to_string(),
            reason: "scheme must be ws or wss".to_string(),
        });
    }

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "v" && key != "encoding")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("v", &GATEWAY_VERSION.to_string())
        .append_pair("encoding", GATEWAY_ENCODING);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url_appends_query() {
        let url = gateway_connection_url("wss://gateway.discord.gg").unwrap();
        assert_eq!(url.as_str(), "wss://gateway.discord.gg/?v=9&encoding=json");
    }

    #[test]
    fn test_connection_url_replaces_existing_version() {
        let url = gateway_connection_url("wss://gateway.example.com/?v=6&compress=zlib").unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("compress".to_string(), "zlib".to_string()),
                ("v".to_string(), "9".to_string()),
                ("encoding".to_string(), "json".to_string()),
            ]
        );
    }

    #[test]
    fn test_connection_url_rejects_http() {
        let err = gateway_connection_url("https://gateway.example.com").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidUrl { .. }));
    }

    #[test]
    fn test_connection_url_rejects_garbage() {
        assert!(gateway_connection_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new("ws://127.0.0.1:9000").unwrap();
        let url = resolver.resolve().await.unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9000/?v=9&encoding=json");
    }

    #[tokio::test]
    async fn test_http_resolver_unreachable_is_request_error() {
        let resolver =
            HttpResolver::new("http://127.0.0.1:1/api/v9/gateway", Duration::from_secs(2)).unwrap();
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Request(_)));
    }
}
