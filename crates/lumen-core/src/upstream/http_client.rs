//! Upstream HTTP client.
//!
//! One pooled `reqwest` client is shared by every dispatcher. Concurrency is
//! bounded by a semaphore so a slow upstream cannot absorb the whole
//! connection pool. The client performs a single exchange per call; retries
//! are the dispatcher's business.

use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::Semaphore;

/// Transport-level failure of one upstream exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timeout")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("connection failed: {0}")]
    Connect(String),

    /// Upstream answered with a non-2xx status; the body is discarded.
    #[error("bad upstream status: {0}")]
    BadStatus(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream concurrency limit reached")]
    ConcurrencyLimit,
}

impl TransportError {
    /// Routine failures that are retried without being logged at error
    /// level: timeouts, refused connections, bad status codes.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Cancelled | Self::Connect(_) | Self::BadStatus(_)
        )
    }

    /// Whether the node is blameless for this failure. Cancellation always
    /// is; a timeout is blameless only when the outer request deadline was
    /// the binding constraint.
    #[must_use]
    pub fn is_node_blameless(&self, deadline_expired: bool) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Timeout => deadline_expired,
            _ => false,
        }
    }
}

/// Proxy-chain headers carried from the inbound request to upstreams.
#[derive(Debug, Clone, Default)]
pub struct ForwardedHeaders {
    /// Client address as seen by this proxy.
    pub real_ip: Option<String>,
    /// Prior `x-forwarded-for` chain, already comma-joined.
    pub forwarded_for: Option<String>,
    /// Prior or locally-observed `x-forwarded-proto`.
    pub proto: Option<String>,
}

impl ForwardedHeaders {
    /// Header pairs to set on the upstream request, folding the client IP
    /// into the forwarding chain.
    #[must_use]
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(3);
        if let Some(ip) = &self.real_ip {
            pairs.push(("x-real-ip", ip.clone()));
        }
        if let Some(proto) = &self.proto {
            pairs.push(("x-forwarded-proto", proto.clone()));
        }
        match (&self.forwarded_for, &self.real_ip) {
            (Some(chain), Some(ip)) => pairs.push(("x-forwarded-for", format!("{chain}, {ip}"))),
            (Some(chain), None) => pairs.push(("x-forwarded-for", chain.clone())),
            (None, Some(ip)) => pairs.push(("x-forwarded-for", ip.clone())),
            (None, None) => {}
        }
        pairs
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum in-flight upstream requests.
    pub concurrent_limit: usize,
    /// How long to wait for a free slot before giving up.
    pub permit_timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 1000,
            permit_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Pooled upstream HTTP client with semaphore-based concurrency control.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    permit_timeout: Duration,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, TransportError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(100)
            .connect_timeout(config.connect_timeout)
            .http2_adaptive_window(true)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("lumen-proxy/0.3")
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                TransportError::Connect(format!("http client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)),
            permit_timeout: config.permit_timeout,
        })
    }

    /// Sends one JSON-RPC POST to `url`, bounded by `timeout`.
    ///
    /// Statuses outside 2xx are reported as [`TransportError::BadStatus`]
    /// with the body discarded, matching reverse-proxy behavior of not
    /// forwarding upstream error pages.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] describing the transport-level failure.
    pub async fn post(
        &self,
        url: &str,
        body: Bytes,
        timeout: Duration,
        forwarded: &ForwardedHeaders,
    ) -> Result<(Bytes, u16), TransportError> {
        let permit = tokio::time::timeout(
            self.permit_timeout,
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(url, "upstream client semaphore acquisition timed out");
            TransportError::ConcurrencyLimit
        })?
        .map_err(|_| TransportError::ConcurrencyLimit)?;
        let _permit = permit;

        let mut request = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .timeout(timeout);
        for (name, value) in forwarded.header_pairs() {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::BadStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        Ok((bytes, status.as_u16()))
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }
}

/// Maps a reqwest failure onto the transport taxonomy, keeping messages free
/// of URLs and addresses.
fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect("connection refused or unreachable".to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Network("response body error".to_string())
    } else {
        TransportError::Network("network error".to_string())
    }
}
