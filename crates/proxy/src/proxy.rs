//! Pingora service
//!
//! Every request is answered from `request_filter`: the pipeline either
//! produces a local reply or fetches from the origin through reqwest, and the
//! result is written to the downstream session directly. Pingora's own
//! upstream path is never taken.

use crate::error::{ProxyError, RelayError};
use crate::response::Reply;
use crate::service::{ClientRequest, Outcome, RelayService};
use crate::upstream::{HttpUpstream, UpstreamResponse};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use config::Config;
use http::header::{HeaderMap, HeaderName, CONTENT_LENGTH};
use http::Method;
use pingora::prelude::*;
use pingora_error::{Error, ErrorType};
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Response headers describing the origin connection rather than the payload
const HOP_BY_HOP_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "trailer",
];

const SERVER_NAME: &str = "gh-relay";

/// Per-request context
pub struct RequestCtx {
    pub request_start: Instant,
    /// "local" or "relayed", for the request log
    pub outcome: Option<&'static str>,
    pub bytes_sent: usize,
    /// Whether this request was counted in the in-flight gauge
    in_flight: bool,
}

impl RequestCtx {
    pub fn new() -> Self {
        Self {
            request_start: Instant::now(),
            outcome: None,
            bytes_sent: 0,
            in_flight: false,
        }
    }
}

impl Default for RequestCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of requests currently being answered
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn enter(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn leave(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    /// Block until no request is in flight or the timeout passes.
    /// Returns true if everything drained.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let check_interval = Duration::from_millis(100);

        loop {
            let active = self.get();
            if active == 0 {
                return true;
            }

            if start.elapsed() >= timeout {
                warn!(in_flight = active, "Grace period expired with requests in flight");
                return false;
            }

            std::thread::sleep(check_interval);
        }
    }
}

/// The relay proxy service
#[derive(Clone)]
pub struct RelayProxy {
    service: Arc<RelayService<HttpUpstream>>,
    in_flight: InFlight,
    max_body_size: usize,
}

impl RelayProxy {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let upstream = HttpUpstream::from_config(&config.relay)?;
        let service = RelayService::new(config, upstream);

        info!(
            prefix = %service.prefix(),
            use_jsdelivr = config.relay.use_jsdelivr,
            whitelist = config.relay.whitelist.len(),
            max_redirects = config.relay.max_redirects,
            max_body_size = config.relay.max_body_size,
            "Relay service ready"
        );

        Ok(Self {
            service: Arc::new(service),
            in_flight: InFlight::default(),
            max_body_size: config.relay.max_body_size,
        })
    }

    /// Handle on the in-flight gauge, for shutdown draining
    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    fn client_request(session: &Session) -> ClientRequest {
        let req = session.req_header();
        ClientRequest {
            method: req.method.clone(),
            path: req.uri.path().to_string(),
            query: req.uri.query().map(str::to_string),
            headers: req.headers.clone(),
            body: Bytes::new(),
        }
    }

    /// Buffer the request body so it can be replayed on every hop.
    ///
    /// Reading stops as soon as the body is known to exceed `limit`.
    async fn read_body(session: &mut Session, limit: usize) -> Result<std::result::Result<Bytes, RelayError>> {
        if let Err(e) = check_declared_length(&session.req_header().headers, limit) {
            return Ok(Err(e));
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = session.read_request_body().await? {
            if let Err(e) = append_body(&mut body, &chunk, limit) {
                return Ok(Err(e));
            }
        }
        Ok(Ok(body.freeze()))
    }

    async fn write_reply(session: &mut Session, reply: Reply, head_only: bool) -> Result<usize> {
        let mut header = ResponseHeader::build(reply.status, Some(reply.headers.len() + 2))?;
        for (name, value) in reply.headers {
            header.append_header(name, value)?;
        }
        header.insert_header("Content-Length", reply.body.len().to_string())?;
        header.insert_header("Server", SERVER_NAME)?;

        let no_body = head_only || reply.body.is_empty();
        session.write_response_header(Box::new(header), no_body).await?;
        if !no_body {
            let sent = reply.body.len();
            session.write_response_body(Some(reply.body), true).await?;
            return Ok(sent);
        }
        Ok(0)
    }

    async fn stream_relayed(
        session: &mut Session,
        response: UpstreamResponse<reqwest::Response>,
        head_only: bool,
    ) -> Result<usize> {
        let mut header = ResponseHeader::build(response.status, Some(response.headers.len() + 1))?;
        for (name, value) in response.headers.iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            header.append_header(name.clone(), value.clone())?;
        }
        header.insert_header("Server", SERVER_NAME)?;

        let mut body = response.body;
        if head_only {
            session.write_response_header(Box::new(header), true).await?;
            return Ok(0);
        }
        session.write_response_header(Box::new(header), false).await?;

        let mut sent = 0;
        loop {
            match body.chunk().await {
                Ok(Some(chunk)) => {
                    sent += chunk.len();
                    session.write_response_body(Some(chunk), false).await?;
                }
                Ok(None) => break,
                Err(e) => {
                    // Headers are already sent, so the client sees a truncated body
                    warn!(error = %e, sent, "Origin body stream failed");
                    return Err(Error::because(ErrorType::ReadError, "reading origin body", e));
                }
            }
        }
        session.write_response_body(Some(Bytes::new()), true).await?;
        Ok(sent)
    }
}

/// Refuse a body whose declared Content-Length is already over the limit
fn check_declared_length(headers: &HeaderMap, limit: usize) -> std::result::Result<(), RelayError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    match declared {
        Some(len) if len > limit as u64 => Err(RelayError::PayloadTooLarge(limit)),
        _ => Ok(()),
    }
}

fn append_body(body: &mut BytesMut, chunk: &[u8], limit: usize) -> std::result::Result<(), RelayError> {
    if body.len() + chunk.len() > limit {
        return Err(RelayError::PayloadTooLarge(limit));
    }
    body.extend_from_slice(chunk);
    Ok(())
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_RESPONSE_HEADERS.contains(&name.as_str())
}

#[async_trait]
impl ProxyHttp for RelayProxy {
    type CTX = RequestCtx;

    fn new_ctx(&self) -> Self::CTX {
        RequestCtx::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        self.in_flight.enter();
        ctx.in_flight = true;

        let mut request = Self::client_request(session);
        let head_only = request.method == Method::HEAD;

        let outcome = match Self::read_body(session, self.max_body_size).await? {
            Ok(body) => {
                request.body = body;
                self.service.handle(&request).await
            }
            Err(e) => self.service.reject(&request, &e),
        };
        ctx.outcome = Some(outcome.kind());
        debug!(
            method = %request.method,
            path = %request.path,
            status = outcome.status().as_u16(),
            outcome = outcome.kind(),
            "Request handled"
        );

        ctx.bytes_sent = match outcome {
            Outcome::Reply(reply) => Self::write_reply(session, reply, head_only).await?,
            Outcome::Relayed(response) => Self::stream_relayed(session, response, head_only).await?,
        };

        Ok(true)
    }

    async fn upstream_peer(&self, _session: &mut Session, _ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        Err(Error::explain(
            ErrorType::InternalError,
            "requests are answered in request_filter",
        ))
    }

    async fn logging(&self, session: &mut Session, e: Option<&pingora_core::Error>, ctx: &mut Self::CTX) {
        if ctx.in_flight {
            self.in_flight.leave();
        }

        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);

        let method = session.req_header().method.as_str();
        let path = session.req_header().uri.path();
        let duration_ms = ctx.request_start.elapsed().as_millis() as u64;

        match e {
            Some(err) => warn!(
                method = %method,
                path = %path,
                status = status,
                duration_ms = duration_ms,
                error = %err,
                "Request failed"
            ),
            None => info!(
                method = %method,
                path = %path,
                status = status,
                duration_ms = duration_ms,
                bytes = ctx.bytes_sent,
                outcome = ctx.outcome.unwrap_or("-"),
                "Request completed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_response_headers() {
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("content-length")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("location")));
    }

    #[test]
    fn test_body_limit() {
        let mut body = BytesMut::new();
        assert!(append_body(&mut body, b"hello", 8).is_ok());
        assert!(append_body(&mut body, b"abc", 8).is_ok());
        assert_eq!(&body[..], b"helloabc");

        let err = append_body(&mut body, b"!", 8).unwrap_err();
        assert!(matches!(err, RelayError::PayloadTooLarge(8)));
        assert_eq!(err.status().as_u16(), 413);
        assert_eq!(body.len(), 8);
    }

    #[test]
    fn test_declared_length_over_limit() {
        let mut headers = HeaderMap::new();
        assert!(check_declared_length(&headers, 16).is_ok());

        headers.insert(CONTENT_LENGTH, http::HeaderValue::from_static("16"));
        assert!(check_declared_length(&headers, 16).is_ok());

        headers.insert(CONTENT_LENGTH, http::HeaderValue::from_static("17"));
        assert!(matches!(
            check_declared_length(&headers, 16),
            Err(RelayError::PayloadTooLarge(16))
        ));
    }

    #[test]
    fn test_proxy_builds_from_default_config() {
        let proxy = RelayProxy::new(&Config::default()).unwrap();
        assert_eq!(proxy.service.prefix(), "/");
        assert_eq!(proxy.max_body_size, 32 * 1024 * 1024);
    }

    #[test]
    fn test_in_flight_drain() {
        let gauge = InFlight::default();
        assert!(gauge.wait_for_drain(Duration::from_millis(10)));

        gauge.enter();
        assert_eq!(gauge.get(), 1);
        assert!(!gauge.wait_for_drain(Duration::from_millis(10)));

        let handle = gauge.clone();
        let waiter = std::thread::spawn(move || handle.wait_for_drain(Duration::from_secs(5)));
        gauge.leave();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_request_ctx_defaults() {
        let ctx = RequestCtx::default();
        assert!(ctx.outcome.is_none());
        assert_eq!(ctx.bytes_sent, 0);
    }
}
