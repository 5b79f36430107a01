//! Ingress policy gate
//!
//! Cheap local checks run before any outbound fetch:
//! - Whitelist of substrings the target path must contain
//! - Crawler user-agent / network organization signatures (410 Gone)
//! - Search-engine referer deny list (403 via the error page)

use config::{BotConfig, RelayConfig};
use tracing::debug;
use url::Url;

/// Substring whitelist for target paths
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    needles: Vec<String>,
}

impl Whitelist {
    pub fn new(needles: Vec<String>) -> Self {
        Self {
            needles: needles.into_iter().filter(|n| !n.is_empty()).collect(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.whitelist.clone())
    }

    /// An empty whitelist accepts everything
    pub fn allows(&self, target: &str) -> bool {
        self.needles.is_empty() || self.needles.iter().any(|n| target.contains(n.as_str()))
    }
}

/// Outcome of the bot/referer heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Pass,
    /// Known crawler: answer 410 without proxying
    Crawler,
    /// Referer is a denied search engine
    DeniedReferer,
}

/// Request attributes the heuristics look at
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientHints<'a> {
    pub user_agent: Option<&'a str>,
    pub organization: Option<&'a str>,
    pub referer: Option<&'a str>,
}

/// Compiled crawler and referer heuristics
#[derive(Debug, Clone)]
pub struct BotFilter {
    user_agents: Vec<String>,
    organizations: Vec<String>,
    organization_header: Option<String>,
    referers: Vec<String>,
}

impl BotFilter {
    pub fn from_config(config: &BotConfig) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };

        Self {
            user_agents: lower(&config.user_agents),
            organizations: lower(&config.organizations),
            organization_header: config
                .organization_header
                .as_ref()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty()),
            referers: lower(&config.referers)
                .into_iter()
                .map(|r| r.trim_start_matches('.').to_string())
                .collect(),
        }
    }

    /// Header name carrying the client's network organization, if configured
    pub fn organization_header(&self) -> Option<&str> {
        self.organization_header.as_deref()
    }

    pub fn check(&self, hints: &ClientHints<'_>) -> GateVerdict {
        if let Some(ua) = hints.user_agent {
            let ua = ua.to_ascii_lowercase();
            if let Some(sig) = self.user_agents.iter().find(|sig| ua.contains(sig.as_str())) {
                debug!(signature = %sig, "Crawler user-agent detected");
                return GateVerdict::Crawler;
            }
        }

        if let Some(org) = hints.organization {
            let org = org.to_ascii_lowercase();
            if let Some(sig) = self.organizations.iter().find(|sig| org.contains(sig.as_str())) {
                debug!(signature = %sig, "Crawler network organization detected");
                return GateVerdict::Crawler;
            }
        }

        if let Some(host) = hints.referer.and_then(referer_host) {
            if self.referers.iter().any(|denied| host_matches(&host, denied)) {
                debug!(referer = %host, "Denied referer");
                return GateVerdict::DeniedReferer;
            }
        }

        GateVerdict::Pass
    }
}

fn referer_host(referer: &str) -> Option<String> {
    Url::parse(referer).ok()?.host_str().map(|h| h.to_ascii_lowercase())
}

/// Exact host or any subdomain of it
pub(crate) fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|head| head.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bots() -> BotFilter {
        BotFilter::from_config(&BotConfig {
            user_agents: vec!["Googlebot".to_string(), "bingbot".to_string()],
            organizations: vec!["Crawler Networks".to_string()],
            organization_header: Some("X-Client-Org".to_string()),
            referers: vec!["google.com".to_string(), ".bing.com".to_string()],
        })
    }

    #[test]
    fn test_whitelist_empty_allows_all() {
        let whitelist = Whitelist::new(vec![]);
        assert!(whitelist.allows("https://github.com/baz/qux/releases/v1"));
    }

    #[test]
    fn test_whitelist_substrings() {
        let whitelist = Whitelist::new(config::parse_list("foo,bar"));
        assert!(whitelist.allows("https://github.com/foo/widget/releases/v1"));
        assert!(whitelist.allows("https://github.com/acme/bar-tools/archive/main.zip"));
        assert!(whitelist.allows("raw.githubusercontent.com/x/y/main/food.txt"));
        assert!(!whitelist.allows("https://github.com/baz/qux/releases/v1"));
    }

    #[test]
    fn test_whitelist_from_config() {
        let relay = RelayConfig {
            whitelist: vec!["acme".to_string()],
            ..Default::default()
        };
        let whitelist = Whitelist::from_config(&relay);
        assert!(whitelist.allows("github.com/acme/widget/tags"));
        assert!(!whitelist.allows("github.com/other/widget/tags"));
    }

    #[test]
    fn test_crawler_user_agent() {
        let filter = bots();
        let hints = ClientHints {
            user_agent: Some("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"),
            ..Default::default()
        };
        assert_eq!(filter.check(&hints), GateVerdict::Crawler);

        let hints = ClientHints {
            user_agent: Some("curl/8.4.0"),
            ..Default::default()
        };
        assert_eq!(filter.check(&hints), GateVerdict::Pass);
    }

    #[test]
    fn test_crawler_organization() {
        let filter = bots();
        assert_eq!(filter.organization_header(), Some("x-client-org"));

        let hints = ClientHints {
            user_agent: Some("Mozilla/5.0"),
            organization: Some("crawler networks inc"),
            ..Default::default()
        };
        assert_eq!(filter.check(&hints), GateVerdict::Crawler);
    }

    #[test]
    fn test_denied_referer() {
        let filter = bots();
        for referer in [
            "https://google.com/search?q=widget",
            "https://www.google.com/",
            "https://cn.bing.com/search",
        ] {
            let hints = ClientHints {
                referer: Some(referer),
                ..Default::default()
            };
            assert_eq!(filter.check(&hints), GateVerdict::DeniedReferer, "{}", referer);
        }
    }

    #[test]
    fn test_allowed_referer() {
        let filter = bots();
        for referer in ["https://notgoogle.com/", "https://github.com/acme", "garbage"] {
            let hints = ClientHints {
                referer: Some(referer),
                ..Default::default()
            };
            assert_eq!(filter.check(&hints), GateVerdict::Pass, "{}", referer);
        }
    }

    #[test]
    fn test_host_matches() {
        assert!(host_matches("example.com", "example.com"));
        assert!(host_matches("a.b.example.com", "example.com"));
        assert!(!host_matches("badexample.com", "example.com"));
        assert!(!host_matches("example.com.evil", "example.com"));
    }
}
