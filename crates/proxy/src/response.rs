//! Locally generated responses

use crate::assets::AssetResponse;
use crate::error::RelayError;
use bytes::Bytes;
use http::StatusCode;

/// Sent on every response so relayed content is never indexed
pub const ROBOTS_TAG: &str = "noindex, nofollow, noarchive, nosnippet";

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

/// A complete response produced without contacting an origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Reply {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "text/plain; charset=utf-8".to_string())],
            body: Bytes::from(body),
        }
    }

    pub fn redirect(status: StatusCode, location: impl Into<String>) -> Self {
        Self::new(status).header("Location", location)
    }

    /// 302 to the error page carrying the failure's status and message
    pub fn error_redirect(prefix: &str, error: &RelayError) -> Self {
        let location = format!(
            "{}error?code={}&msg={}",
            prefix,
            error.status().as_u16(),
            urlencoding::encode(error.public_message())
        );
        Self::redirect(StatusCode::FOUND, location)
    }

    /// Terminal answer for crawlers
    pub fn gone() -> Self {
        Self::text(StatusCode::GONE, "410 Gone")
    }

    pub fn robots() -> Self {
        Self::text(StatusCode::OK, ROBOTS_TXT)
    }

    pub fn preflight(cors_headers: Vec<(String, String)>) -> Self {
        Self::new(StatusCode::NO_CONTENT).headers(cors_headers)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("location"))
            .map(|(_, value)| value.as_str())
    }
}

impl From<AssetResponse> for Reply {
    fn from(asset: AssetResponse) -> Self {
        Self {
            status: asset.status,
            headers: std::iter::once(("Content-Type".to_string(), asset.content_type))
                .chain(asset.headers)
                .collect(),
            body: asset.body,
        }
    }
}
