//! Error types for gh-relay-proxy

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Per-request failure, surfaced to the client through the error page redirect
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid target url: {0}")]
    InvalidTarget(String),

    #[error("target is not in the whitelist")]
    Blocked,

    #[error("resource is not a supported shape")]
    UnsupportedResource,

    #[error("referer is denied")]
    DeniedReferer,

    #[error("origin responded with {0}")]
    UpstreamStatus(StatusCode),

    #[error("redirect chain exceeded {0} hops")]
    TooManyRedirects(u32),

    #[error("failed to reach origin: {0}")]
    Transport(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

impl RelayError {
    /// Status code reported to the client for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            RelayError::Blocked | RelayError::UnsupportedResource | RelayError::DeniedReferer => {
                StatusCode::FORBIDDEN
            }
            RelayError::UpstreamStatus(status) => *status,
            RelayError::TooManyRedirects(_) => StatusCode::LOOP_DETECTED,
            RelayError::Transport(_) => StatusCode::BAD_GATEWAY,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Short message shown on the error page
    pub fn public_message(&self) -> &'static str {
        match self {
            RelayError::InvalidTarget(_) => "invalid target url",
            RelayError::Blocked => "blocked",
            RelayError::UnsupportedResource => "resource is not in whitelist",
            RelayError::DeniedReferer => "access denied",
            RelayError::UpstreamStatus(_) => "failed to access resource",
            RelayError::TooManyRedirects(_) => "too many redirects",
            RelayError::Transport(_) => "failed to reach origin",
            RelayError::PayloadTooLarge(_) => "request body too large",
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}
