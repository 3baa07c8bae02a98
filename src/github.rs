//! GitHub API interaction module
//!
//! Provides the release-listing capability and a `reqwest` implementation of it.

use crate::download::USER_AGENT;
use crate::error::{Error, Result};
use crate::platform::{filter_release_assets, get_system_info};
use crate::types::{normalize_version, Asset, GitHubRelease, Release};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicU32, Ordering};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

const RATE_LIMIT_UNKNOWN: u32 = u32::MAX;
const PRERELEASE_PAGE_SIZE: u32 = 20;

/// Source of release metadata. `Ok(None)` means GitHub answered "not found".
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch_latest_release(&self, owner: &str, repo: &str) -> Result<Option<Release>>;
    async fn fetch_prerelease(&self, owner: &str, repo: &str) -> Result<Option<Release>>;
    async fn fetch_release_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<Option<Release>>;

    /// Requests left in the current rate-limit window, if known.
    fn rate_limit_remaining(&self) -> Option<u32> {
        None
    }
}

pub enum ReleaseTarget<'a> {
    Latest,
    Tag(&'a str),
    List,
}

/// Build GitHub API URL for fetching release information
///
/// # Arguments
/// * `owner` / `repo` - Repository coordinates
/// * `target` - Latest release, a specific tag, or the release list
pub fn build_gh_release_url(api_base: &str, owner: &str, repo: &str, target: ReleaseTarget) -> String {
    match target {
        ReleaseTarget::Latest => format!("{}/repos/{}/{}/releases/latest", api_base, owner, repo),
        ReleaseTarget::Tag(tag) => {
            format!("{}/repos/{}/{}/releases/tags/{}", api_base, owner, repo, tag)
        }
        ReleaseTarget::List => format!(
            "{}/repos/{}/{}/releases?per_page={}",
            api_base, owner, repo, PRERELEASE_PAGE_SIZE
        ),
    }
}

/// Convert the API payload into the crate's `Release`, keeping only assets usable on `arch`.
pub fn release_from_github(owner: &str, repo: &str, raw: GitHubRelease, arch: &str) -> Release {
    let assets: Vec<Asset> = raw.assets.into_iter().map(Asset::from).collect();
    Release {
        owner: owner.to_string(),
        repo: repo.to_string(),
        version: normalize_version(&raw.tag_name),
        original_tag_name: raw.tag_name,
        prerelease: raw.prerelease,
        assets: filter_release_assets(assets, arch),
        published_at: raw.published_at,
        html_url: raw.html_url,
    }
}

pub struct GitHubClient {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    arch: String,
    remaining: AtomicU32,
}

impl GitHubClient {
    /// Client for api.github.com using `GITHUB_TOKEN` when set.
    pub fn new() -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        Self::with_base(GITHUB_API_BASE, token)
    }

    pub fn with_base(api_base: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::network(api_base, e))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            arch: get_system_info().arch,
            remaining: AtomicU32::new(RATE_LIMIT_UNKNOWN),
        })
    }

    async fn get(&self, url: &str) -> Result<Option<reqwest::Response>> {
        tracing::debug!("Fetching GitHub release info from: {}", url);

        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| Error::network(url, e))?;
        self.record_rate_limit(&response);

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(Some(response))
    }

    fn record_rate_limit(&self, response: &reqwest::Response) {
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok());
        if let Some(remaining) = remaining {
            tracing::trace!("GitHub rate limit remaining: {}", remaining);
            self.remaining.store(remaining, Ordering::Relaxed);
        }
    }

    async fn fetch_one(&self, owner: &str, repo: &str, url: &str) -> Result<Option<Release>> {
        let Some(response) = self.get(url).await? else {
            return Ok(None);
        };
        let raw: GitHubRelease = response.json().await.map_err(|e| Error::network(url, e))?;
        Ok(Some(release_from_github(owner, repo, raw, &self.arch)))
    }

    /// Ask GitHub for the current core quota; also primes `rate_limit_remaining`.
    pub async fn fetch_rate_limit(&self) -> Result<u32> {
        let url = format!("{}/rate_limit", self.api_base);
        let response = self.get(&url).await?.ok_or_else(|| Error::HttpStatus {
            url: url.clone(),
            status: 404,
        })?;
        let body: serde_json::Value = response.json().await.map_err(|e| Error::network(&url, e))?;
        let remaining = body["resources"]["core"]["remaining"]
            .as_u64()
            .map(|v| v.min(u64::from(u32::MAX - 1)) as u32)
            .ok_or_else(|| Error::network(&url, "missing resources.core.remaining"))?;
        self.remaining.store(remaining, Ordering::Relaxed);
        Ok(remaining)
    }
}

#[async_trait]
impl ReleaseSource for GitHubClient {
    async fn fetch_latest_release(&self, owner: &str, repo: &str) -> Result<Option<Release>> {
        let url = build_gh_release_url(&self.api_base, owner, repo, ReleaseTarget::Latest);
        self.fetch_one(owner, repo, &url).await
    }

    async fn fetch_prerelease(&self, owner: &str, repo: &str) -> Result<Option<Release>> {
        let url = build_gh_release_url(&self.api_base, owner, repo, ReleaseTarget::List);
        let Some(response) = self.get(&url).await? else {
            return Ok(None);
        };
        let releases: Vec<GitHubRelease> =
            response.json().await.map_err(|e| Error::network(&url, e))?;

        Ok(releases
            .into_iter()
            .find(|r| r.prerelease && !r.draft)
            .map(|raw| release_from_github(owner, repo, raw, &self.arch)))
    }

    async fn fetch_release_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<Option<Release>> {
        let url = build_gh_release_url(&self.api_base, owner, repo, ReleaseTarget::Tag(tag));
        self.fetch_one(owner, repo, &url).await
    }

    fn rate_limit_remaining(&self) -> Option<u32> {
        match self.remaining.load(Ordering::Relaxed) {
            RATE_LIMIT_UNKNOWN => None,
            remaining => Some(remaining),
        }
    }
}
