//! Resource classification
//!
//! Decides whether a target URL is one of the GitHub resource shapes this
//! proxy relays. Matching is an ordered table of host + path-segment
//! predicates; rows are disjoint so at most one can match any URL.

use crate::error::RelayError;
use url::Url;

const GITHUB: &[&str] = &["github.com"];
const RAW_HOSTS: &[&str] = &["raw.githubusercontent.com", "raw.github.com"];
const GIST_HOSTS: &[&str] = &["gist.github.com", "gist.githubusercontent.com"];

/// Base URL of the jsDelivr GitHub mirror
pub const JSDELIVR_BASE: &str = "https://cdn.jsdelivr.net/gh";

/// Recognized resource shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceShape {
    /// github.com/{owner}/{repo}/releases/* or /archive/*
    ReleaseOrArchive,
    /// github.com/{owner}/{repo}/blob/* or /raw/*
    BlobOrRaw,
    /// github.com/{owner}/{repo}/info* or /git-* (smart HTTP)
    InfoOrGitProtocol,
    /// github.com/{owner}/{repo}/tags*
    TagListing,
    /// raw.githubusercontent.com/{owner}/{repo}/{ref}/{path...}
    RawContentHost,
    /// gist.github.com/{user}/{id...}
    GistContent,
}

impl ResourceShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceShape::ReleaseOrArchive => "release_or_archive",
            ResourceShape::BlobOrRaw => "blob_or_raw",
            ResourceShape::InfoOrGitProtocol => "info_or_git_protocol",
            ResourceShape::TagListing => "tag_listing",
            ResourceShape::RawContentHost => "raw_content_host",
            ResourceShape::GistContent => "gist_content",
        }
    }
}

impl std::fmt::Display for ResourceShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ShapeRule {
    shape: ResourceShape,
    hosts: &'static [&'static str],
    path: fn(&[&str]) -> bool,
}

/// Evaluated top to bottom; the first matching row wins.
const SHAPE_TABLE: &[ShapeRule] = &[
    ShapeRule {
        shape: ResourceShape::ReleaseOrArchive,
        hosts: GITHUB,
        path: |s| repo_kind(s).is_some_and(|k| k == "releases" || k == "archive") && s.len() > 3,
    },
    ShapeRule {
        shape: ResourceShape::BlobOrRaw,
        hosts: GITHUB,
        path: |s| repo_kind(s).is_some_and(|k| k == "blob" || k == "raw") && s.len() > 3,
    },
    ShapeRule {
        shape: ResourceShape::InfoOrGitProtocol,
        hosts: GITHUB,
        path: |s| repo_kind(s).is_some_and(|k| k.starts_with("info") || k.starts_with("git-")),
    },
    ShapeRule {
        shape: ResourceShape::TagListing,
        hosts: GITHUB,
        path: |s| repo_kind(s).is_some_and(|k| k.starts_with("tags")),
    },
    ShapeRule {
        shape: ResourceShape::RawContentHost,
        hosts: RAW_HOSTS,
        path: |s| {
            s.len() >= 4
                && s[..3].iter().all(|seg| !seg.is_empty())
                && s[3..].iter().any(|seg| !seg.is_empty())
        },
    },
    ShapeRule {
        shape: ResourceShape::GistContent,
        hosts: GIST_HOSTS,
        path: |s| s.len() >= 2 && !s[0].is_empty() && s[1..].iter().any(|seg| !seg.is_empty()),
    },
];

/// Third path segment of github.com/{owner}/{repo}/{kind}, when owner and repo are present
fn repo_kind<'a>(segments: &[&'a str]) -> Option<&'a str> {
    match segments {
        [owner, repo, kind, ..] if !owner.is_empty() && !repo.is_empty() => Some(*kind),
        _ => None,
    }
}

fn segments(url: &Url) -> Vec<&str> {
    url.path_segments().map(|s| s.collect()).unwrap_or_default()
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Classify an absolute URL into a recognized shape
pub fn classify(url: &Url) -> Option<ResourceShape> {
    if !is_http(url) {
        return None;
    }
    let host = url.host_str()?;
    let segments = segments(url);

    SHAPE_TABLE
        .iter()
        .find(|rule| rule.hosts.contains(&host) && (rule.path)(&segments))
        .map(|rule| rule.shape)
}

/// Classify a URL string. Scheme-less and unparseable input is never recognized.
pub fn classify_str(url: &str) -> Option<ResourceShape> {
    Url::parse(url).ok().as_ref().and_then(classify)
}

/// Every table row matching the URL (used to check disjointness)
#[cfg(test)]
fn matching_rules(url: &Url) -> Vec<ResourceShape> {
    let host = url.host_str().unwrap_or_default();
    let segments = segments(url);
    SHAPE_TABLE
        .iter()
        .filter(|rule| rule.hosts.contains(&host) && (rule.path)(&segments))
        .map(|rule| rule.shape)
        .collect()
}

/// A github.com blob URL decomposed into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub owner: String,
    pub repo: String,
    pub git_ref: String,
    /// Remaining path after the ref, still percent-encoded
    pub path: String,
    pub query: Option<String>,
}

impl BlobLocation {
    /// Decompose github.com/{owner}/{repo}/blob/{ref}/{path...}
    pub fn parse(url: &Url) -> Option<Self> {
        if url.host_str()? != "github.com" || !is_http(url) {
            return None;
        }
        match segments(url).as_slice() {
            [owner, repo, "blob", git_ref, rest @ ..]
                if !owner.is_empty() && !repo.is_empty() && !git_ref.is_empty() =>
            {
                Some(Self {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    git_ref: git_ref.to_string(),
                    path: rest.join("/"),
                    query: url.query().map(str::to_string),
                })
            }
            _ => None,
        }
    }

    /// Equivalent URL on the jsDelivr mirror: /blob/{ref}/ becomes @{ref}/
    pub fn jsdelivr_url(&self) -> String {
        let mut url = format!(
            "{}/{}/{}@{}/{}",
            JSDELIVR_BASE, self.owner, self.repo, self.git_ref, self.path
        );
        if let Some(query) = &self.query {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Equivalent github.com URL serving raw bytes: /blob/ becomes /raw/
    pub fn raw_url(&self) -> Result<Url, RelayError> {
        let mut url = format!(
            "https://github.com/{}/{}/raw/{}/{}",
            self.owner, self.repo, self.git_ref, self.path
        );
        if let Some(query) = &self.query {
            url.push('?');
            url.push_str(query);
        }
        Url::parse(&url).map_err(|e| RelayError::InvalidTarget(e.to_string()))
    }
}

/// Build the absolute target URL from the path remainder after the prefix.
///
/// Edge routers may collapse "https://" into "https:/", so any run of
/// slashes after the scheme is rebuilt as "https://". Bare "host/path"
/// is promoted to https.
pub fn parse_target(raw: &str) -> Result<Url, RelayError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RelayError::InvalidTarget("empty target".to_string()));
    }

    let repaired = repair_scheme(raw);

    let url = Url::parse(&repaired).map_err(|e| RelayError::InvalidTarget(e.to_string()))?;
    if !is_http(&url) || url.host_str().is_none() {
        return Err(RelayError::InvalidTarget(repaired));
    }
    Ok(url)
}

fn repair_scheme(raw: &str) -> String {
    let lower = raw.get(..6).unwrap_or(raw).to_ascii_lowercase();
    let rest = if lower.starts_with("https:") {
        Some(&raw[6..])
    } else if lower.starts_with("http:") {
        Some(&raw[5..])
    } else {
        None
    };

    match rest {
        Some(rest) if rest.starts_with('/') => format!("https://{}", rest.trim_start_matches('/')),
        Some(_) => raw.to_string(),
        None => format!("https://{}", raw),
    }
}
