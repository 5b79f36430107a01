//! Request pipeline
//!
//! Everything between "a request arrived" and "this is what goes back",
//! independent of the HTTP server. The Pingora glue in [`crate::proxy`]
//! only reads the request, calls [`RelayService::handle`] and writes the
//! outcome.

use crate::assets::AssetServer;
use crate::classify::{classify, parse_target, BlobLocation};
use crate::cors::CompiledCors;
use crate::error::RelayError;
use crate::gate::{BotFilter, ClientHints, GateVerdict, Whitelist};
use crate::relay::{InboundRequest, RelayEngine};
use crate::response::{Reply, ROBOTS_TAG};
use crate::route::{Ingress, IngressRouter};
use crate::upstream::{Upstream, UpstreamResponse};
use bytes::Bytes;
use config::Config;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use tracing::{debug, info, warn};

const ACCESS_CONTROL_REQUEST_HEADERS: &str = "access-control-request-headers";

/// CORS headers an origin may send; the relay's own allow-list replaces them
const ORIGIN_CORS_HEADERS: [&str; 3] = [
    "access-control-allow-origin",
    "access-control-allow-credentials",
    "access-control-expose-headers",
];

/// An inbound request, fully buffered
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ClientRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// What to send back to the client
pub enum Outcome<B> {
    /// Generated locally
    Reply(Reply),
    /// Final origin response, headers already normalized
    Relayed(UpstreamResponse<B>),
}

impl<B> Outcome<B> {
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Reply(reply) => reply.status,
            Outcome::Relayed(response) => response.status,
        }
    }

    /// Short label for request logs
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Reply(_) => "local",
            Outcome::Relayed(_) => "relayed",
        }
    }
}

pub struct RelayService<U> {
    router: IngressRouter,
    whitelist: Whitelist,
    bots: BotFilter,
    cors: CompiledCors,
    assets: AssetServer,
    engine: RelayEngine<U>,
    use_jsdelivr: bool,
    public_origin: Option<String>,
}

impl<U: Upstream> RelayService<U> {
    pub fn new(config: &Config, upstream: U) -> Self {
        let prefix = config::normalize_prefix(Some(&config.relay.prefix));

        Self {
            router: IngressRouter::new(prefix),
            whitelist: Whitelist::from_config(&config.relay),
            bots: BotFilter::from_config(&config.bots),
            cors: CompiledCors::from_config(&config.cors),
            assets: AssetServer::from_config(&config.server),
            engine: RelayEngine::new(upstream, &config.relay),
            use_jsdelivr: config.relay.use_jsdelivr,
            public_origin: config
                .server
                .public_origin
                .as_ref()
                .map(|o| o.trim_end_matches('/').to_string()),
        }
    }

    pub fn prefix(&self) -> &str {
        self.router.prefix()
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> &RelayEngine<U> {
        &self.engine
    }

    /// Externally visible origin of this proxy, used for redirect rewriting
    pub fn proxy_origin(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(origin) = &self.public_origin {
            return Some(origin.clone());
        }

        let host = headers.get(http::header::HOST).and_then(|v| v.to_str().ok())?;
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|p| *p == "http" || *p == "https")
            .unwrap_or("http");
        Some(format!("{}://{}", proto, host))
    }

    /// Run the full pipeline for one request
    pub async fn handle(&self, request: &ClientRequest) -> Outcome<U::Body> {
        let origin = request.header("origin");
        let preflight_headers = request.header(ACCESS_CONTROL_REQUEST_HEADERS);

        let ingress = self.router.route(
            &request.method,
            &request.path,
            request.query.as_deref(),
            preflight_headers.is_some(),
        );

        let outcome = match ingress {
            Ingress::Robots => Outcome::Reply(Reply::robots()),
            Ingress::Preflight => {
                let headers = self.cors.preflight_headers(origin, preflight_headers.unwrap_or_default());
                // Preflight headers already carry the CORS pair
                return Outcome::Reply(Reply::preflight(headers).header("X-Robots-Tag", ROBOTS_TAG));
            }
            Ingress::Asset { asset, code, msg } => {
                Outcome::Reply(self.assets.serve(asset, code, msg.as_deref()).await.into())
            }
            Ingress::Shortcut(q) => match self.shortcut(request, &q) {
                Ok(reply) => Outcome::Reply(reply),
                Err(e) => {
                    debug!(q = %q, error = %e, "Rejected shortcut");
                    self.error(&e)
                }
            },
            Ingress::Target(raw) => match self.relay_target(&raw, request).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    info!(target = %raw, error = %e, status = e.status().as_u16(), "Relay failed");
                    self.error(&e)
                }
            },
            Ingress::OutsidePrefix => {
                debug!(path = %request.path, prefix = %self.prefix(), "Path outside prefix");
                self.error(&RelayError::UnsupportedResource)
            }
        };

        self.annotate(outcome, origin)
    }

    /// Answer a request whose body could not be buffered
    pub fn reject(&self, request: &ClientRequest, error: &RelayError) -> Outcome<U::Body> {
        info!(path = %request.path, error = %error, status = error.status().as_u16(), "Request rejected");
        self.annotate(self.error(error), request.header("origin"))
    }

    fn shortcut(&self, request: &ClientRequest, q: &str) -> Result<Reply, RelayError> {
        let host = request
            .header("host")
            .ok_or_else(|| RelayError::InvalidTarget("missing host".to_string()))?;
        let location = self.router.shortcut_location(host, q);
        // The decoded query may carry bytes a header cannot hold
        HeaderValue::from_str(&location).map_err(|_| RelayError::InvalidTarget(location.clone()))?;
        Ok(Reply::redirect(StatusCode::MOVED_PERMANENTLY, location))
    }

    async fn relay_target(&self, raw: &str, request: &ClientRequest) -> Result<Outcome<U::Body>, RelayError> {
        let hints = ClientHints {
            user_agent: request.header("user-agent"),
            organization: self.bots.organization_header().and_then(|h| request.header(h)),
            referer: request.header("referer"),
        };
        match self.bots.check(&hints) {
            GateVerdict::Pass => {}
            GateVerdict::Crawler => return Ok(Outcome::Reply(Reply::gone())),
            GateVerdict::DeniedReferer => return Err(RelayError::DeniedReferer),
        }

        if !self.whitelist.allows(raw) {
            debug!(target = %raw, "Target not in whitelist");
            return Err(RelayError::Blocked);
        }

        let mut target = parse_target(raw)?;

        if let Some(blob) = BlobLocation::parse(&target) {
            if self.use_jsdelivr {
                let location = blob.jsdelivr_url();
                debug!(target = %target, location = %location, "Redirecting blob to CDN");
                return Ok(Outcome::Reply(Reply::redirect(StatusCode::FOUND, location)));
            }
            target = blob.raw_url()?;
        }

        let shape = classify(&target).ok_or(RelayError::UnsupportedResource)?;

        let proxy_origin = self
            .proxy_origin(&request.headers)
            .ok_or_else(|| RelayError::InvalidTarget("missing host".to_string()))?;

        debug!(target = %target, shape = %shape, "Relaying");

        let inbound = InboundRequest::new(request.method.clone(), request.headers.clone(), request.body.clone());
        let response = self.engine.relay(target, &inbound, &proxy_origin).await?;
        Ok(Outcome::Relayed(response))
    }

    fn error(&self, error: &RelayError) -> Outcome<U::Body> {
        Outcome::Reply(Reply::error_redirect(self.prefix(), error))
    }

    /// Headers every response carries
    fn common_headers(&self, origin: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![("X-Robots-Tag".to_string(), ROBOTS_TAG.to_string())];
        headers.extend(self.cors.response_headers(origin));
        headers
    }

    fn annotate(&self, outcome: Outcome<U::Body>, origin: Option<&str>) -> Outcome<U::Body> {
        let common = self.common_headers(origin);
        match outcome {
            Outcome::Reply(reply) => Outcome::Reply(reply.headers(common)),
            Outcome::Relayed(mut response) => {
                for name in ORIGIN_CORS_HEADERS {
                    response.headers.remove(name);
                }
                for (name, value) in common {
                    let name = match HeaderName::try_from(name.as_str()) {
                        Ok(name) => name,
                        Err(e) => {
                            warn!(header = %name, error = %e, "Invalid header name");
                            continue;
                        }
                    };
                    let value = match HeaderValue::try_from(value.as_str()) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(header = %name, error = %e, "Invalid header value");
                            continue;
                        }
                    };
                    if name == http::header::VARY {
                        response.headers.append(name, value);
                    } else {
                        response.headers.insert(name, value);
                    }
                }
                Outcome::Relayed(response)
            }
        }
    }
}
