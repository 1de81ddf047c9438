//! Release-registry repository for GitHub-style release assets
//!
//! URLs follow
//! `https://github.com/{owner}/{repo}/releases/{latest|download/{tag}}/{path}`.
//! For `latest`, the default version is the highest non-draft stable semver
//! tag, or the highest pre-release when nothing stable has been published.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::header::LINK;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use capi_operator_common::retry::{retry_retryable, RetryConfig};
use capi_operator_common::{Error, SemanticVersion};

use crate::Repository;

const GITHUB_HOST: &str = "github.com";
const GITHUB_API: &str = "https://api.github.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Release-list pages followed before giving up on the rest
const MAX_RELEASE_PAGES: usize = 10;

/// One entry of a repository's release list
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ReleaseInfo {
    /// Git tag of the release
    pub tag_name: String,
    /// Whether the release is marked as a pre-release
    #[serde(default)]
    pub prerelease: bool,
    /// Whether the release is an unpublished draft
    #[serde(default)]
    pub draft: bool,
}

/// HTTP access to a release registry
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    /// Releases published for `owner/repo`
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<ReleaseInfo>, Error>;

    /// Body of a release asset
    async fn download(&self, url: &str) -> Result<Vec<u8>, Error>;
}

/// [`ReleaseClient`] over reqwest against github.com
///
/// Release lists are paged 100 at a time by following `Link: rel="next"`,
/// up to 1000 releases.
pub struct HttpReleaseClient {
    http: reqwest::Client,
    api_base: String,
    retry: RetryConfig,
}

impl HttpReleaseClient {
    /// Client against the public GitHub API
    pub fn new() -> Result<Self, Error> {
        Self::with_api_base(GITHUB_API)
    }

    /// Client against a GitHub-compatible API at `api_base`
    pub fn with_api_base(api_base: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("capi-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::internal_with_context("http-client", e.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.into(),
            retry: RetryConfig::with_max_attempts(3),
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, Error> {
        self.get_page(url).await.map(|(body, _)| body)
    }

    /// Body plus the `rel="next"` link, if any
    async fn get_page(&self, url: &str) -> Result<(Vec<u8>, Option<String>), Error> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::registry(url, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::not_found("release asset", url)),
            status if !status.is_success() => {
                Err(Error::registry(url, format!("unexpected status {}", status)))
            }
            _ => {
                let next = response
                    .headers()
                    .get(LINK)
                    .and_then(|v| v.to_str().ok())
                    .and_then(next_link);
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::registry(url, e.to_string()))?;
                Ok((body.to_vec(), next))
            }
        }
    }
}

/// Target of the `rel="next"` entry of a `Link` header
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';').map(str::trim);
        let target = parts.next()?.strip_prefix('<')?.strip_suffix('>')?;
        parts
            .any(|param| param == r#"rel="next""#)
            .then(|| target.to_string())
    })
}

#[async_trait]
impl ReleaseClient for HttpReleaseClient {
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<ReleaseInfo>, Error> {
        let url = format!(
            "{}/repos/{}/{}/releases?per_page=100",
            self.api_base.trim_end_matches('/'),
            owner,
            repo
        );
        let mut next = Some(url);
        let mut releases = Vec::new();
        for _ in 0..MAX_RELEASE_PAGES {
            let Some(page_url) = next.take() else {
                break;
            };
            let (body, link) =
                retry_retryable(&self.retry, "list-releases", || self.get_page(&page_url)).await?;
            let page: Vec<ReleaseInfo> = serde_json::from_slice(&body)
                .map_err(|e| Error::registry(&page_url, format!("invalid release list: {}", e)))?;
            releases.extend(page);
            next = link;
        }
        if next.is_some() {
            warn!(owner, repo, count = releases.len(), "release list truncated");
        }
        Ok(releases)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, Error> {
        retry_retryable(&self.retry, "download-asset", || self.get_bytes(url)).await
    }
}

/// Parsed release URL
#[derive(Clone, Debug, PartialEq)]
struct ReleaseUrl {
    owner: String,
    repo: String,
    /// `None` for `latest`
    tag: Option<String>,
    components_path: String,
}

impl ReleaseUrl {
    fn parse(url: &str) -> Result<Self, Error> {
        let parsed = Url::parse(url).map_err(|e| Error::registry(url, e.to_string()))?;
        if parsed.host_str() != Some(GITHUB_HOST) {
            return Err(Error::registry(
                url,
                format!("unsupported host {:?}, only {} is supported", parsed.host_str(), GITHUB_HOST),
            ));
        }

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let invalid = || {
            Error::registry(
                url,
                "expected https://github.com/{owner}/{repo}/releases/{latest|download/{tag}}/{path}",
            )
        };

        match segments.as_slice() {
            [owner, repo, "releases", "latest", path @ ..] if !path.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
                tag: None,
                components_path: path.join("/"),
            }),
            [owner, repo, "releases", "download", tag, path @ ..] if !path.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
                tag: Some(tag.to_string()),
                components_path: path.join("/"),
            }),
            _ => Err(invalid()),
        }
    }

    fn asset_url(&self, version: &str, path: &str) -> String {
        format!(
            "https://{}/{}/{}/releases/download/{}/{}",
            GITHUB_HOST, self.owner, self.repo, version, path
        )
    }
}

/// The highest published stable semver tag, falling back to the highest
/// pre-release
fn latest_release(releases: &[ReleaseInfo]) -> Option<SemanticVersion> {
    let published: Vec<(SemanticVersion, bool)> = releases
        .iter()
        .filter(|r| !r.draft)
        .filter_map(|r| {
            let version = SemanticVersion::parse(&r.tag_name).ok()?;
            let stable = !r.prerelease && !version.is_prerelease();
            Some((version, stable))
        })
        .collect();

    let stable = published.iter().filter(|(_, stable)| *stable).map(|(v, _)| v).max();
    stable
        .or_else(|| published.iter().map(|(v, _)| v).max())
        .cloned()
}

/// Repository over release assets of a GitHub project
pub struct RemoteRegistryRepository {
    url: ReleaseUrl,
    default_version: String,
    client: Arc<dyn ReleaseClient>,
}

impl RemoteRegistryRepository {
    /// Parse `url` and resolve the default version.
    ///
    /// For `latest` URLs this lists releases once; the result is fixed for the
    /// lifetime of the repository.
    pub async fn new(url: &str, client: Arc<dyn ReleaseClient>) -> Result<Self, Error> {
        let release_url = ReleaseUrl::parse(url)?;

        let default_version = match &release_url.tag {
            Some(tag) => tag.clone(),
            None => {
                let releases = client
                    .list_releases(&release_url.owner, &release_url.repo)
                    .await?;
                latest_release(&releases)
                    .map(|v| v.as_str().to_string())
                    .ok_or_else(|| Error::registry(url, "no published release found"))?
            }
        };

        info!(
            owner = %release_url.owner,
            repo = %release_url.repo,
            version = %default_version,
            "resolved release repository"
        );
        Ok(Self {
            url: release_url,
            default_version,
            client,
        })
    }
}

#[async_trait]
impl Repository for RemoteRegistryRepository {
    fn default_version(&self) -> String {
        self.default_version.clone()
    }

    fn components_path(&self) -> String {
        self.url.components_path.clone()
    }

    async fn get_file(&self, version: &str, path: &str) -> Result<Vec<u8>, Error> {
        let url = self.url.asset_url(version, path);
        debug!(url = %url, "downloading release asset");
        self.client.download(&url).await
    }
}
