//! gh-relay-proxy: relay engine and Pingora service for gh-relay
//!
//! This crate classifies GitHub resource URLs, applies the ingress policy,
//! follows or rewrites origin redirects, and serves the companion UI assets.
//! The HTTP front end is Cloudflare's Pingora framework.

pub mod assets;
pub mod classify;
pub mod cors;
pub mod error;
pub mod gate;
pub mod proxy;
pub mod relay;
pub mod response;
pub mod route;
pub mod service;
pub mod upstream;

pub use assets::{Asset, AssetResponse, AssetServer};
pub use classify::{classify, classify_str, parse_target, BlobLocation, ResourceShape};
pub use cors::CompiledCors;
pub use error::*;
pub use gate::{BotFilter, ClientHints, GateVerdict, Whitelist};
pub use proxy::RelayProxy;
pub use relay::{InboundRequest, RelayEngine, STRIPPED_RESPONSE_HEADERS};
pub use response::{Reply, ROBOTS_TAG};
pub use route::{Ingress, IngressRouter};
pub use service::{ClientRequest, Outcome, RelayService};
pub use upstream::{HttpUpstream, OutboundRequest, Upstream, UpstreamResponse};
