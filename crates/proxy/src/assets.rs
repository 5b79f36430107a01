//! Companion UI assets
//!
//! Serves the landing page, the error page and the favicon from a directory
//! on disk. The error page is usually reached through the error redirect
//! (`{prefix}error?code=NNN&msg=...`); when the bundle has no error page a
//! plain-text body is synthesized so the redirect still resolves.

use bytes::Bytes;
use config::ServerConfig;
use http::StatusCode;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

/// Named asset requested by the ingress router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Index,
    ErrorPage,
    Favicon,
}

impl Asset {
    /// Map an inbound path to an asset. The prefix root is handled by the router.
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/" | "/index.html" => Some(Asset::Index),
            "/error" | "/error.html" => Some(Asset::ErrorPage),
            "/favicon.ico" => Some(Asset::Favicon),
            _ => None,
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            Asset::Index => "index.html",
            Asset::ErrorPage => "error.html",
            Asset::Favicon => "favicon.ico",
        }
    }
}

/// Asset lookup result
#[derive(Debug)]
pub struct AssetResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
}

/// Directory-backed asset bundle
#[derive(Debug, Clone)]
pub struct AssetServer {
    root: PathBuf,
}

impl AssetServer {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.assets_dir)
    }

    /// Serve an asset.
    ///
    /// `code` overrides the response status when it is in 400..=599.
    /// `msg` is only used for the synthesized error page.
    pub async fn serve(&self, asset: Asset, code: Option<u16>, msg: Option<&str>) -> AssetResponse {
        let override_status = code
            .filter(|c| (400..=599).contains(c))
            .and_then(|c| StatusCode::from_u16(c).ok());

        let mut response = match self.resolve(asset) {
            Some(path) => self.serve_file(&path).await,
            None if asset == Asset::ErrorPage => {
                let status = override_status.unwrap_or(StatusCode::BAD_REQUEST);
                debug!(status = status.as_u16(), "No error page in bundle, using plain text");
                plain_text(status, msg.unwrap_or_else(|| status.canonical_reason().unwrap_or("error")))
            }
            None => plain_text(StatusCode::NOT_FOUND, "Not Found"),
        };

        if let Some(status) = override_status {
            response.status = status;
            // Error pages must not be cached under the asset's URL
            response.headers.retain(|(name, _)| name != "Cache-Control");
            response.headers.push(("Cache-Control".to_string(), "no-store".to_string()));
        }
        response
    }

    /// Locate an asset's file, refusing one that resolves outside the bundle
    fn resolve(&self, asset: Asset) -> Option<PathBuf> {
        let canonical_root = match self.root.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!(root = ?self.root, error = %e, "Assets directory is not accessible");
                return None;
            }
        };

        // Missing files fail here
        let canonical_path = self.root.join(asset.file_name()).canonicalize().ok()?;

        // Symlinks may not escape the bundle
        if !canonical_path.starts_with(&canonical_root) || !canonical_path.is_file() {
            return None;
        }
        Some(canonical_path)
    }

    async fn serve_file(&self, path: &Path) -> AssetResponse {
        let content = match fs::read(path).await {
            Ok(c) => c,
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read asset");
                return plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Read error");
            }
        };

        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let content_type = if mime.type_() == mime_guess::mime::TEXT {
            format!("{}; charset=utf-8", mime.essence_str())
        } else {
            mime.essence_str().to_string()
        };

        debug!(path = ?path, mime = %content_type, "Serving asset");

        let mut headers = Vec::new();

        if let Ok(metadata) = fs::metadata(path).await {
            if let Ok(modified) = metadata.modified() {
                let secs = modified
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                headers.push(("ETag".to_string(), format!("\"{:x}-{:x}\"", metadata.len(), secs)));
            }
        }
        headers.push(("Cache-Control".to_string(), "public, max-age=3600".to_string()));

        AssetResponse {
            status: StatusCode::OK,
            content_type,
            body: Bytes::from(content),
            headers,
        }
    }
}

fn plain_text(status: StatusCode, message: &str) -> AssetResponse {
    AssetResponse {
        status,
        content_type: "text/plain; charset=utf-8".to_string(),
        body: Bytes::from(format!("{} {}", status.as_u16(), message)),
        headers: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn bundle() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let mut index = File::create(temp_dir.path().join("index.html")).unwrap();
        index.write_all(b"<html>relay</html>").unwrap();
        let mut error = File::create(temp_dir.path().join("error.html")).unwrap();
        error.write_all(b"<html>oops</html>").unwrap();
        temp_dir
    }

    #[test]
    fn test_asset_from_path() {
        assert_eq!(Asset::from_path("/"), Some(Asset::Index));
        assert_eq!(Asset::from_path("/index.html"), Some(Asset::Index));
        assert_eq!(Asset::from_path("/error"), Some(Asset::ErrorPage));
        assert_eq!(Asset::from_path("/favicon.ico"), Some(Asset::Favicon));
        assert_eq!(Asset::from_path("/github.com/acme/widget/tags"), None);
    }

    #[tokio::test]
    async fn test_serve_index() {
        let dir = bundle();
        let server = AssetServer::new(dir.path());

        let response = server.serve(Asset::Index, None, None).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "text/html; charset=utf-8");
        assert_eq!(response.body.as_ref(), b"<html>relay</html>");
        assert!(response.headers.iter().any(|(k, _)| k == "ETag"));
    }

    #[tokio::test]
    async fn test_code_overrides_status() {
        let dir = bundle();
        let server = AssetServer::new(dir.path());

        let response = server.serve(Asset::ErrorPage, Some(508), Some("too many redirects")).await;

        assert_eq!(response.status.as_u16(), 508);
        assert_eq!(response.body.as_ref(), b"<html>oops</html>");
        assert!(response
            .headers
            .iter()
            .any(|(k, v)| k == "Cache-Control" && v == "no-store"));
    }

    #[tokio::test]
    async fn test_code_out_of_range_ignored() {
        let dir = bundle();
        let server = AssetServer::new(dir.path());

        for code in [200, 302, 399, 600, 999] {
            let response = server.serve(Asset::Index, Some(code), None).await;
            assert_eq!(response.status, StatusCode::OK, "{}", code);
        }
    }

    #[tokio::test]
    async fn test_missing_error_page_falls_back_to_text() {
        let dir = TempDir::new().unwrap();
        let server = AssetServer::new(dir.path());

        let response = server.serve(Asset::ErrorPage, Some(403), Some("blocked")).await;

        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(response.content_type, "text/plain; charset=utf-8");
        assert_eq!(response.body.as_ref(), b"403 blocked");
    }

    #[tokio::test]
    async fn test_missing_asset_is_not_found() {
        let dir = TempDir::new().unwrap();
        let server = AssetServer::new(dir.path());

        let response = server.serve(Asset::Favicon, None, None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_root_directory() {
        let server = AssetServer::new("/nonexistent/gh-relay/assets");
        let response = server.serve(Asset::Index, None, None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_directory_is_not_an_asset() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("favicon.ico")).unwrap();

        let server = AssetServer::new(dir.path());
        let response = server.serve(Asset::Favicon, None, None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_blocked() {
        let outside = TempDir::new().unwrap();
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, b"secret").unwrap();

        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(&secret, dir.path().join("index.html")).unwrap();

        let server = AssetServer::new(dir.path());
        let response = server.serve(Asset::Index, None, None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
