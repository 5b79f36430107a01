//! Relay engine
//!
//! Fetches the target from the origin and resolves redirects:
//! - A `Location` that is itself a recognized resource is rewritten to point
//!   back through this proxy, so the client's next request re-enters the
//!   pipeline.
//! - Any other `Location` is followed here, so the client never sees the hop.
//!
//! Hops are followed in a loop bounded by `max_redirects`.

use crate::classify::classify;
use crate::error::RelayError;
use crate::upstream::{OutboundRequest, Upstream, UpstreamResponse};
use bytes::Bytes;
use config::RelayConfig;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use tracing::{debug, info, warn};
use url::Url;

/// Response headers that would block embedding or re-proxying
pub const STRIPPED_RESPONSE_HEADERS: [&str; 3] = [
    "content-security-policy",
    "content-security-policy-report-only",
    "clear-site-data",
];

/// Request headers never forwarded to the origin
const HOP_BY_HOP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// The client's request as seen by the relay
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: Method, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            headers,
            body,
        }
    }
}

/// Relay engine bound to an origin transport
pub struct RelayEngine<U> {
    upstream: U,
    prefix: String,
    max_redirects: u32,
    user_agent: HeaderValue,
}

impl<U: Upstream> RelayEngine<U> {
    pub fn new(upstream: U, config: &RelayConfig) -> Self {
        let user_agent = config
            .user_agent
            .as_deref()
            .and_then(|ua| HeaderValue::from_str(ua).ok())
            .unwrap_or_else(|| HeaderValue::from_static(concat!("gh-relay/", env!("CARGO_PKG_VERSION"))));

        Self {
            upstream,
            prefix: config::normalize_prefix(Some(&config.prefix)),
            max_redirects: config.max_redirects,
            user_agent,
        }
    }

    #[cfg(test)]
    pub(crate) fn upstream(&self) -> &U {
        &self.upstream
    }

    #[cfg(test)]
    pub(crate) fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// Relay `target` and return the final response.
    ///
    /// `proxy_origin` is this proxy's externally visible origin
    /// (scheme://host[:port]) used when rewriting redirects.
    pub async fn relay(
        &self,
        target: Url,
        inbound: &InboundRequest,
        proxy_origin: &str,
    ) -> Result<UpstreamResponse<U::Body>, RelayError> {
        let headers = self.outbound_headers(&inbound.headers);
        let mut target = target;
        let mut hop: u32 = 0;

        loop {
            if hop >= self.max_redirects {
                warn!(target = %target, hops = hop, "Redirect limit reached");
                return Err(RelayError::TooManyRedirects(self.max_redirects));
            }

            let request = OutboundRequest {
                method: inbound.method.clone(),
                url: target.clone(),
                headers: headers.clone(),
                body: inbound.body.clone(),
            };

            let mut response = self.upstream.send(request).await?;
            let status = response.status;

            if status.as_u16() >= 400 {
                info!(target = %target, status = status.as_u16(), hop, "Origin returned error status");
                return Err(RelayError::UpstreamStatus(status));
            }

            if let Some(location) = location_header(&response.headers) {
                match resolve_location(&target, &location) {
                    Some((next, suffix)) if classify(&next).is_some() => {
                        let rewritten = format!("{}{}{}", proxy_origin, self.prefix, suffix);
                        debug!(location = %location, rewritten = %rewritten, "Rewriting redirect through proxy");
                        match HeaderValue::from_str(&rewritten) {
                            Ok(value) => {
                                response.headers.insert(header::LOCATION, value);
                            }
                            Err(e) => {
                                warn!(error = %e, location = %rewritten, "Rewritten location is not a valid header");
                                return Err(RelayError::InvalidTarget(rewritten));
                            }
                        }
                    }
                    Some((next, _)) => {
                        debug!(from = %target, to = %next, hop, "Following redirect");
                        target = next;
                        hop += 1;
                        continue;
                    }
                    None => {
                        debug!(location = %location, "Passing through non-http redirect");
                    }
                }
            }

            strip_response_headers(&mut response.headers);
            return Ok(response);
        }
    }

    /// Inbound headers minus hop-by-hop ones, with the language pinned to
    /// English and a default User-Agent
    fn outbound_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = inbound.clone();
        for name in HOP_BY_HOP_REQUEST_HEADERS {
            headers.remove(*name);
        }
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, self.user_agent.clone());
        }
        headers
    }
}

fn location_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve a Location value against the current target.
///
/// Returns the absolute URL and the string to append after the proxy prefix:
/// the original value when it was already absolute, the resolved URL otherwise.
/// Non-http(s) locations yield `None`.
fn resolve_location(current: &Url, location: &str) -> Option<(Url, String)> {
    let (url, suffix) = match Url::parse(location) {
        Ok(url) => (url, location.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let url = current.join(location).ok()?;
            let suffix = url.to_string();
            (url, suffix)
        }
        Err(_) => return None,
    };

    matches!(url.scheme(), "http" | "https").then_some((url, suffix))
}

/// Remove headers that would break embedding the relayed response
pub fn strip_response_headers(headers: &mut HeaderMap) {
    for name in STRIPPED_RESPONSE_HEADERS {
        headers.remove(HeaderName::from_static(name));
    }
}
