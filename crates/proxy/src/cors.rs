//! CORS (Cross-Origin Resource Sharing) handling

use crate::gate::host_matches;
use config::CorsConfig;
use tracing::debug;
use url::Url;

/// Methods advertised in preflight responses
pub const PREFLIGHT_ALLOW_METHODS: &str = "GET,POST,PUT,PATCH,TRACE,DELETE,HEAD,OPTIONS";

/// Preflight cache lifetime in seconds (20 days)
pub const PREFLIGHT_MAX_AGE: u64 = 1_728_000;

/// Compiled CORS allow-list for efficient runtime checking
#[derive(Debug, Clone, Default)]
pub struct CompiledCors {
    /// Lowercased hostnames; each also admits its subdomains
    allowed_hosts: Vec<String>,
    /// Whether "*" was configured
    is_wildcard: bool,
}

impl CompiledCors {
    pub fn from_config(config: &CorsConfig) -> Self {
        let is_wildcard = config.allowed_origins.iter().any(|o| o == "*");

        let allowed_hosts = config
            .allowed_origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .map(|o| allowed_host(o))
            .filter(|h| !h.is_empty())
            .collect();

        Self {
            allowed_hosts,
            is_wildcard,
        }
    }

    /// Check if the given Origin header value is allowed
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.is_wildcard {
            return true;
        }

        let host = match Url::parse(origin).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) {
            Some(host) => host,
            None => return false,
        };

        self.allowed_hosts.iter().any(|allowed| host_matches(&host, allowed))
    }

    /// The Access-Control-Allow-Origin value for the given request origin.
    ///
    /// The request origin is echoed back verbatim when allowed.
    pub fn get_allow_origin(&self, request_origin: Option<&str>) -> Option<String> {
        let origin = request_origin?;

        if !self.is_origin_allowed(origin) {
            debug!(origin = %origin, "CORS: origin not allowed");
            return None;
        }

        Some(origin.to_string())
    }

    /// CORS headers for a normal (non-preflight) response
    pub fn response_headers(&self, request_origin: Option<&str>) -> Vec<(String, String)> {
        match self.get_allow_origin(request_origin) {
            Some(allow_origin) => vec![
                ("Access-Control-Allow-Origin".to_string(), allow_origin),
                ("Access-Control-Expose-Headers".to_string(), "*".to_string()),
                ("Vary".to_string(), "Origin".to_string()),
            ],
            None => Vec::new(),
        }
    }

    /// CORS headers for a preflight (OPTIONS) response.
    ///
    /// Preflights are always answered; the requested headers are echoed back.
    /// The allow-origin pair is only present for allowed origins.
    pub fn preflight_headers(
        &self,
        request_origin: Option<&str>,
        request_headers: &str,
    ) -> Vec<(String, String)> {
        let mut cors_headers = vec![
            ("Access-Control-Allow-Methods".to_string(), PREFLIGHT_ALLOW_METHODS.to_string()),
            ("Access-Control-Max-Age".to_string(), PREFLIGHT_MAX_AGE.to_string()),
            ("Access-Control-Allow-Headers".to_string(), request_headers.to_string()),
        ];
        cors_headers.extend(self.response_headers(request_origin));
        cors_headers
    }
}

/// Accept both "example.com" and "https://example.com" in the allow-list
fn allowed_host(entry: &str) -> String {
    let entry = entry.trim();
    let host = if entry.contains("://") {
        Url::parse(entry)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    } else {
        entry.trim_start_matches('.').to_string()
    };
    host.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_test_cors() -> CompiledCors {
        CompiledCors::from_config(&CorsConfig {
            allowed_origins: vec!["allowed.example".to_string(), "https://app.test".to_string()],
        })
    }

    #[test]
    fn test_origin_allowed() {
        let cors = make_test_cors();

        assert!(cors.is_origin_allowed("https://allowed.example"));
        assert!(cors.is_origin_allowed("http://allowed.example:8080"));
        assert!(cors.is_origin_allowed("https://cdn.allowed.example"));
        assert!(cors.is_origin_allowed("https://app.test"));
        assert!(!cors.is_origin_allowed("https://notallowed.example"));
        assert!(!cors.is_origin_allowed("https://other.com"));
        assert!(!cors.is_origin_allowed("null"));
    }

    #[test]
    fn test_wildcard_origin() {
        let cors = CompiledCors::from_config(&CorsConfig {
            allowed_origins: vec!["*".to_string()],
        });

        assert!(cors.is_origin_allowed("https://any-site.com"));
        assert!(cors.is_wildcard);
        assert_eq!(
            cors.get_allow_origin(Some("https://any-site.com")),
            Some("https://any-site.com".to_string())
        );
    }

    #[test]
    fn test_get_allow_origin_specific() {
        let cors = make_test_cors();

        assert_eq!(
            cors.get_allow_origin(Some("https://allowed.example")),
            Some("https://allowed.example".to_string())
        );
        assert_eq!(cors.get_allow_origin(Some("https://other.com")), None);
        assert_eq!(cors.get_allow_origin(None), None);
    }

    #[test]
    fn test_response_headers() {
        let cors = make_test_cors();

        let headers: HashMap<_, _> = cors
            .response_headers(Some("https://allowed.example"))
            .into_iter()
            .collect();
        assert_eq!(
            headers.get("Access-Control-Allow-Origin"),
            Some(&"https://allowed.example".to_string())
        );
        assert_eq!(headers.get("Access-Control-Expose-Headers"), Some(&"*".to_string()));

        assert!(cors.response_headers(Some("https://elsewhere.example")).is_empty());
        assert!(cors.response_headers(None).is_empty());
    }

    #[test]
    fn test_preflight_headers() {
        let cors = make_test_cors();

        let headers: HashMap<_, _> = cors
            .preflight_headers(Some("https://allowed.example"), "x-requested-with, range")
            .into_iter()
            .collect();

        assert_eq!(headers.get("Access-Control-Allow-Methods"), Some(&PREFLIGHT_ALLOW_METHODS.to_string()));
        assert_eq!(headers.get("Access-Control-Max-Age"), Some(&"1728000".to_string()));
        assert_eq!(
            headers.get("Access-Control-Allow-Headers"),
            Some(&"x-requested-with, range".to_string())
        );
        assert_eq!(
            headers.get("Access-Control-Allow-Origin"),
            Some(&"https://allowed.example".to_string())
        );
    }

    #[test]
    fn test_preflight_headers_unknown_origin() {
        let cors = make_test_cors();

        let headers: HashMap<_, _> = cors
            .preflight_headers(Some("https://evil.example"), "range")
            .into_iter()
            .collect();

        assert!(headers.get("Access-Control-Allow-Origin").is_none());
        assert_eq!(headers.get("Access-Control-Allow-Headers"), Some(&"range".to_string()));
    }
}
