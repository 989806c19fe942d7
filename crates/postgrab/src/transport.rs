//! The HTTP boundary: single physical requests, each with a fresh [`Identity`],
//! classified into a structured [`FailureKind`] exactly once.

use std::error::Error as StdError;
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use url::Url;

use crate::config::ScraperConfig;
use crate::egress::EgressMode;
use crate::identity::Identity;
use crate::proxy::{ProxyConfig, build_proxy};

/// What went wrong with one physical attempt, as far as retry policy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 403.
    Forbidden,
    /// HTTP 429.
    RateLimited,
    /// The peer reset the connection.
    ConnectionReset,
    /// HTTP 404.
    NotFound,
    Other,
}

impl FailureKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::FORBIDDEN => FailureKind::Forbidden,
            StatusCode::TOO_MANY_REQUESTS => FailureKind::RateLimited,
            StatusCode::NOT_FOUND => FailureKind::NotFound,
            _ => FailureKind::Other,
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind:?} fetching {url}: {message}")]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub url: String,
    pub status: Option<StatusCode>,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(kind: FailureKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn status(status: StatusCode, url: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::from_status(status),
            url: url.into(),
            status: Some(status),
            message: format!("HTTP {status}"),
        }
    }

    pub fn from_reqwest(err: reqwest::Error, url: impl Into<String>) -> Self {
        if let Some(status) = err.status() {
            return Self::status(status, url);
        }
        let kind = if is_connection_reset(&err) {
            FailureKind::ConnectionReset
        } else {
            FailureKind::Other
        };
        Self::new(kind, url, err.to_string())
    }

    pub fn from_io(err: std::io::Error, url: impl Into<String>) -> Self {
        let kind = if err.kind() == std::io::ErrorKind::ConnectionReset {
            FailureKind::ConnectionReset
        } else {
            FailureKind::Other
        };
        Self::new(kind, url, err.to_string())
    }
}

/// Walk the source chain looking for an `ECONNRESET`.
pub fn is_connection_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::ConnectionReset
        {
            return true;
        }
        current = e.source();
    }
    false
}

/// One physical request per call. Implementations must not carry session state
/// between calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str, mode: EgressMode) -> Result<Value, AttemptFailure>;

    async fn get_bytes(&self, url: &str, mode: EgressMode) -> Result<Bytes, AttemptFailure>;

    /// Stream the body of `url` into `dest`, returning the number of bytes written.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        mode: EgressMode,
    ) -> Result<u64, AttemptFailure>;
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate in the process got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// reqwest-backed transport. A client is built per attempt around that attempt's
/// identity, with the proxy attached only for the routed path.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    config: ScraperConfig,
}

impl ReqwestTransport {
    pub fn new(config: ScraperConfig) -> Self {
        install_rustls_provider();
        Self { config }
    }

    fn proxy(&self) -> Option<&ProxyConfig> {
        self.config.proxy.as_ref()
    }

    fn client_for(
        &self,
        identity: &Identity,
        mode: EgressMode,
        url: &str,
    ) -> Result<Client, AttemptFailure> {
        let mut builder = Client::builder()
            .cookie_provider(identity.jar())
            .user_agent(identity.user_agent())
            .default_headers(self.config.headers.clone())
            // Sockets must not outlive the identity.
            .pool_max_idle_per_host(0);

        if !self.config.timeout.is_zero() {
            builder = builder.timeout(self.config.timeout);
        }
        if !self.config.connect_timeout.is_zero() {
            builder = builder.connect_timeout(self.config.connect_timeout);
        }

        builder = match (mode, self.proxy()) {
            (EgressMode::Routed, Some(proxy)) => {
                let proxy = build_proxy(proxy)
                    .map_err(|e| AttemptFailure::new(FailureKind::Other, url, e.to_string()))?;
                builder.proxy(proxy)
            }
            _ => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| {
                AttemptFailure::new(FailureKind::Other, url, format!("failed to build client: {e}"))
            })
    }

    async fn send(
        &self,
        url: &str,
        mode: EgressMode,
    ) -> Result<reqwest::Response, AttemptFailure> {
        let parsed = Url::parse(url)
            .map_err(|e| AttemptFailure::new(FailureKind::Other, url, e.to_string()))?;
        let identity = Identity::fresh(&self.config.cookie, &self.config.user_agents, &parsed);
        let client = self.client_for(&identity, mode, url)?;

        trace!(url, %mode, user_agent = identity.user_agent(), "Sending request");
        let result = client.get(parsed).send().await;
        match result {
            Ok(response) => {
                identity.discard(Some(response.headers()));
                let status = response.status();
                if status.is_success() {
                    Ok(response)
                } else {
                    Err(AttemptFailure::status(status, url))
                }
            }
            Err(e) => {
                identity.discard(None);
                Err(AttemptFailure::from_reqwest(e, url))
            }
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get_json(&self, url: &str, mode: EgressMode) -> Result<Value, AttemptFailure> {
        let response = self.send(url, mode).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(e, url))?;
        serde_json::from_slice(&body).map_err(|e| {
            AttemptFailure::new(FailureKind::Other, url, format!("invalid JSON body: {e}"))
        })
    }

    async fn get_bytes(&self, url: &str, mode: EgressMode) -> Result<Bytes, AttemptFailure> {
        let response = self.send(url, mode).await?;
        response
            .bytes()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(e, url))
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        mode: EgressMode,
    ) -> Result<u64, AttemptFailure> {
        let response = self.send(url, mode).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| AttemptFailure::from_io(e, url))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AttemptFailure::from_reqwest(e, url))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptFailure::from_io(e, url))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| AttemptFailure::from_io(e, url))?;

        debug!(url, bytes = written, path = %dest.display(), "Download complete");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            FailureKind::from_status(StatusCode::FORBIDDEN),
            FailureKind::Forbidden
        );
        assert_eq!(
            FailureKind::from_status(StatusCode::TOO_MANY_REQUESTS),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::from_status(StatusCode::NOT_FOUND),
            FailureKind::NotFound
        );
        assert_eq!(
            FailureKind::from_status(StatusCode::BAD_GATEWAY),
            FailureKind::Other
        );
    }

    #[derive(Debug, Error)]
    #[error("wrapped")]
    struct Wrapper(#[source] std::io::Error);

    #[test]
    fn finds_reset_in_source_chain() {
        let reset = Wrapper(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(is_connection_reset(&reset));

        let refused = Wrapper(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(!is_connection_reset(&refused));
    }

    #[test]
    fn client_failures_name_the_request_url() {
        let config = ScraperConfig::new("a=b")
            .with_proxy(ProxyConfig::new(crate::proxy::ProxyType::Http, "bad host", 8080));
        let transport = ReqwestTransport::new(config);
        let url = "https://www.reddit.com/r/rust/comments/abc/post.json";
        let identity = Identity::fresh("a=b", &[], &Url::parse(url).unwrap());

        let failure = transport
            .client_for(&identity, EgressMode::Routed, url)
            .unwrap_err();
        assert_eq!(failure.url, url);
        assert_eq!(failure.kind, FailureKind::Other);

        assert!(transport.client_for(&identity, EgressMode::Direct, url).is_ok());
    }

    #[test]
    fn io_reset_maps_to_reset_kind() {
        let failure = AttemptFailure::from_io(
            std::io::Error::from(std::io::ErrorKind::ConnectionReset),
            "https://example.com",
        );
        assert_eq!(failure.kind, FailureKind::ConnectionReset);
    }
}
