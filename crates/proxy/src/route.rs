//! Ingress routing
//!
//! Decides what an inbound request is before any policy or network work:
//! robots.txt, CORS preflight, a UI asset, a `?q=` shortcut, or a relay
//! target. Checks run in that order; the first match wins.

use crate::assets::Asset;
use http::Method;
use tracing::debug;

/// Routing decision for one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingress {
    Robots,
    Preflight,
    Asset {
        asset: Asset,
        /// `?code=` status override
        code: Option<u16>,
        /// `?msg=` text for the synthesized error page
        msg: Option<String>,
    },
    /// `?q=<url>`: redirect to `{prefix}{url}` on this host
    Shortcut(String),
    /// Path (and query) remainder after the prefix
    Target(String),
    /// Path does not start with the configured prefix
    OutsidePrefix,
}

#[derive(Debug, Clone)]
pub struct IngressRouter {
    prefix: String,
}

impl IngressRouter {
    /// `prefix` must already be normalized (leading and trailing `/`)
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Route a request.
    ///
    /// `preflight` is true when the request carries
    /// `access-control-request-headers`.
    pub fn route(&self, method: &Method, path: &str, query: Option<&str>, preflight: bool) -> Ingress {
        if path == "/robots.txt" {
            return Ingress::Robots;
        }

        if *method == Method::OPTIONS && preflight {
            return Ingress::Preflight;
        }

        if *method == Method::GET || *method == Method::HEAD {
            if let Some(asset) = self.asset_for(path) {
                let code = query_param(query, "code").and_then(|c| c.trim().parse::<u16>().ok());
                let msg = query_param(query, "msg");
                debug!(path = %path, asset = ?asset, code = ?code, "Serving asset");
                return Ingress::Asset { asset, code, msg };
            }
        }

        if let Some(q) = query_param(query, "q").filter(|q| !q.is_empty()) {
            return Ingress::Shortcut(q);
        }

        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => {
                let mut target = rest.to_string();
                if let Some(query) = query {
                    target.push('?');
                    target.push_str(query);
                }
                Ingress::Target(target)
            }
            None => Ingress::OutsidePrefix,
        }
    }

    /// Assets live at the root and again under the prefix, so the error
    /// redirect `{prefix}error` always lands on the error page.
    fn asset_for(&self, path: &str) -> Option<Asset> {
        if let Some(asset) = Asset::from_path(path) {
            return Some(asset);
        }

        let bare = self.prefix.trim_end_matches('/');
        if !bare.is_empty() && path == bare {
            return Some(Asset::Index);
        }

        let rest = path.strip_prefix(self.prefix.as_str())?;
        Asset::from_path(&format!("/{}", rest))
    }

    /// Location for a `?q=` shortcut
    pub fn shortcut_location(&self, host: &str, q: &str) -> String {
        format!("https://{}{}{}", host, self.prefix, q)
    }
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
