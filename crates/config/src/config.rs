//! Configuration structures and parsing for gh-relay

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid value for environment variable {name}: {value:?}")]
    Env { name: &'static str, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Environment variables read once at startup, applied over the file config
pub const ENV_PREFIX: &str = "PREFIX";
pub const ENV_WHITE_LIST: &str = "WHITE_LIST";
pub const ENV_USE_JSDELIVR: &str = "USE_JSDELIVR";
pub const ENV_ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
pub const ENV_MAX_REDIRECTS: &str = "MAX_REDIRECTS";
pub const ENV_LISTEN: &str = "LISTEN";
pub const ENV_ASSETS_DIR: &str = "ASSETS_DIR";
pub const ENV_PUBLIC_ORIGIN: &str = "PUBLIC_ORIGIN";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Listener and static asset settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Relay engine settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// CORS origin allow-list
    #[serde(default)]
    pub cors: CorsConfig,

    /// Crawler and referer heuristics
    #[serde(default)]
    pub bots: BotConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string and normalize it
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load the file if given, then apply process environment overrides.
    ///
    /// This is the single place the process environment is read.
    pub fn from_startup(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup function
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prefix) = lookup(ENV_PREFIX) {
            self.relay.prefix = prefix;
        }
        if let Some(list) = lookup(ENV_WHITE_LIST) {
            self.relay.whitelist = parse_list(&list);
        }
        if let Some(flag) = lookup(ENV_USE_JSDELIVR) {
            self.relay.use_jsdelivr = parse_flag(&flag);
        }
        if let Some(list) = lookup(ENV_ALLOWED_ORIGINS) {
            self.cors.allowed_origins = parse_list(&list);
        }
        if let Some(value) = lookup(ENV_MAX_REDIRECTS) {
            self.relay.max_redirects = value.trim().parse().map_err(|_| ConfigError::Env {
                name: ENV_MAX_REDIRECTS,
                value: value.clone(),
            })?;
        }
        if let Some(list) = lookup(ENV_LISTEN) {
            self.server.listen = parse_list(&list);
        }
        if let Some(dir) = lookup(ENV_ASSETS_DIR) {
            self.server.assets_dir = PathBuf::from(dir);
        }
        if let Some(origin) = lookup(ENV_PUBLIC_ORIGIN) {
            self.server.public_origin = Some(origin).filter(|o| !o.trim().is_empty());
        }

        self.normalize();
        self.validate()
    }

    /// Normalize values that have a canonical form
    pub fn normalize(&mut self) {
        self.relay.prefix = normalize_prefix(Some(&self.relay.prefix));
        self.relay.whitelist = clean_list(std::mem::take(&mut self.relay.whitelist));
        self.cors.allowed_origins = clean_list(std::mem::take(&mut self.cors.allowed_origins));
        if let Some(origin) = &mut self.server.public_origin {
            let trimmed = origin.trim().trim_end_matches('/').to_string();
            *origin = trimmed;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.is_empty() {
            return Err(ConfigError::Validation(
                "Server has no listen addresses".to_string(),
            ));
        }

        if self.relay.max_redirects == 0 {
            return Err(ConfigError::Validation(
                "relay.max_redirects must be at least 1".to_string(),
            ));
        }

        if let Some(origin) = &self.server.public_origin {
            let parsed = url::Url::parse(origin).map_err(|e| {
                ConfigError::Validation(format!("Invalid public_origin '{}': {}", origin, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(ConfigError::Validation(format!(
                    "public_origin '{}' must be an http(s) origin",
                    origin
                )));
            }
            if parsed.path() != "/" || parsed.query().is_some() {
                return Err(ConfigError::Validation(format!(
                    "public_origin '{}' must not carry a path or query",
                    origin
                )));
            }
        }

        debug!(
            prefix = %self.relay.prefix,
            whitelist = self.relay.whitelist.len(),
            allowed_origins = self.cors.allowed_origins.len(),
            "Configuration validated"
        );

        Ok(())
    }
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Grace period for graceful shutdown in seconds (default: 30)
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,

    /// OpenTelemetry tracing configuration
    #[serde(default)]
    pub tracing: TracingConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            grace_period: default_grace_period(),
            tracing: TracingConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_grace_period() -> u64 {
    30
}

/// OpenTelemetry tracing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Enable OpenTelemetry tracing
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint (e.g., "http://localhost:4317")
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Sampling ratio (0.0 to 1.0, default: 1.0 = sample everything)
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "gh-relay".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

/// Listener and static asset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen addresses (":8080" binds all interfaces)
    #[serde(default = "default_listen")]
    pub listen: Vec<String>,

    /// Directory holding the companion UI (index.html, error.html, favicon.ico)
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Externally visible origin of this proxy, e.g. "https://gh.example.com".
    /// When unset it is derived from the inbound Host header.
    #[serde(default)]
    pub public_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            assets_dir: default_assets_dir(),
            public_origin: None,
        }
    }
}

fn default_listen() -> Vec<String> {
    vec![":8080".to_string()]
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("./public")
}

/// Relay engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Route prefix, always normalized to start and end with '/'
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Substrings of which at least one must appear in the target path.
    /// Empty allows every target.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Answer github.com blob requests with a redirect to jsDelivr
    #[serde(default)]
    pub use_jsdelivr: bool,

    /// Maximum number of redirect hops followed for one request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Largest request body, in bytes, buffered for relaying
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Connect timeout for origin requests in seconds (transport default when unset)
    #[serde(default)]
    pub connect_timeout: Option<u64>,

    /// Total timeout for one origin request in seconds (transport default when unset)
    #[serde(default)]
    pub request_timeout: Option<u64>,

    /// User-Agent sent to the origin when the client sent none
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            whitelist: Vec::new(),
            use_jsdelivr: false,
            max_redirects: default_max_redirects(),
            max_body_size: default_max_body_size(),
            connect_timeout: None,
            request_timeout: None,
            user_agent: None,
        }
    }
}

fn default_prefix() -> String {
    "/".to_string()
}

fn default_max_redirects() -> u32 {
    5
}

fn default_max_body_size() -> usize {
    32 * 1024 * 1024
}

/// CORS origin allow-list.
///
/// Entries are hostnames; an entry also admits its subdomains
/// ("example.com" admits "cdn.example.com"). "*" admits every origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Crawler and referer heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Case-insensitive user-agent substrings answered with 410 Gone
    #[serde(default = "default_bot_user_agents")]
    pub user_agents: Vec<String>,

    /// Case-insensitive network organization substrings answered with 410 Gone
    #[serde(default)]
    pub organizations: Vec<String>,

    /// Request header carrying the client's network organization, set by a
    /// fronting edge (e.g. a CDN worker). Organization matching is off when unset.
    #[serde(default)]
    pub organization_header: Option<String>,

    /// Referer hostnames (or their parent domains) redirected to the error page
    #[serde(default = "default_denied_referers")]
    pub referers: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            user_agents: default_bot_user_agents(),
            organizations: Vec::new(),
            organization_header: None,
            referers: default_denied_referers(),
        }
    }
}

fn default_bot_user_agents() -> Vec<String> {
    [
        "googlebot",
        "bingbot",
        "baiduspider",
        "yandexbot",
        "duckduckbot",
        "slurp",
        "sogou",
        "360spider",
        "bytespider",
        "petalbot",
        "applebot",
        "semrushbot",
        "ahrefsbot",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_denied_referers() -> Vec<String> {
    [
        "google.com",
        "bing.com",
        "baidu.com",
        "yandex.com",
        "duckduckgo.com",
        "sogou.com",
        "so.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Normalize a route prefix so it starts and ends with '/'.
///
/// Missing or blank input yields "/".
pub fn normalize_prefix(prefix: Option<&str>) -> String {
    let trimmed = prefix.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return "/".to_string();
    }

    let mut normalized = String::with_capacity(trimmed.len() + 2);
    if !trimmed.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(trimmed);
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Split a comma-separated list, trimming entries and dropping empty ones
pub fn parse_list(value: &str) -> Vec<String> {
    clean_list(value.split(',').map(str::to_string))
}

fn clean_list<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Interpret a boolean-like environment value ("1", "true", "yes", "on")
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
