//! Origin transport
//!
//! The relay engine talks to origins through the [`Upstream`] trait so the
//! redirect logic can run against an in-memory origin in tests. The
//! production implementation is a reqwest client with redirects disabled.

use crate::error::{ProxyError, RelayError};
use async_trait::async_trait;
use bytes::Bytes;
use config::RelayConfig;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One outbound hop
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Origin response with a transport-specific body
#[derive(Debug)]
pub struct UpstreamResponse<B> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: B,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    type Body: Send;

    /// Issue a single request. Redirects must not be followed.
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse<Self::Body>, RelayError>;
}

/// reqwest-backed origin client
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn from_config(config: &RelayConfig) -> Result<Self, ProxyError> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());

        if let Some(secs) = config.connect_timeout {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.request_timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    type Body = reqwest::Response;

    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse<Self::Body>, RelayError> {
        debug!(method = %request.method, url = %request.url, "Sending origin request");

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;

        Ok(UpstreamResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: response,
        })
    }
}
