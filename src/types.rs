use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Release-selection axis; also partitions the release cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Prerelease,
    Latest,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Stable, Channel::Prerelease, Channel::Latest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Prerelease => "prerelease",
            Channel::Latest => "latest",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
    /// Hash published by GitHub in `algo:hex` form.
    #[serde(default)]
    pub digest: Option<String>,
}

impl Asset {
    pub fn digest(&self) -> Option<&str> {
        self.digest
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub owner: String,
    pub repo: String,
    pub version: String,
    pub original_tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Strip the conventional `v` prefix from a release tag.
pub fn normalize_version(tag: &str) -> String {
    let tag = tag.trim();
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
        .to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumFormat {
    Traditional,
    Bsd,
    Yaml,
}

impl ChecksumFormat {
    pub fn from_filename(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".yml") || lower.ends_with(".yaml") {
            ChecksumFormat::Yaml
        } else if lower.ends_with(".digest") {
            ChecksumFormat::Bsd
        } else {
            ChecksumFormat::Traditional
        }
    }
}

impl fmt::Display for ChecksumFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumFormat::Traditional => "traditional",
            ChecksumFormat::Bsd => "bsd",
            ChecksumFormat::Yaml => "yaml",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumFileInfo {
    pub filename: String,
    pub url: String,
    pub format: ChecksumFormat,
}

impl ChecksumFileInfo {
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        let filename = filename.into();
        let format = ChecksumFormat::from_filename(&filename);
        Self {
            filename,
            url: url.into(),
            format,
        }
    }
}

/// Result of checking one app against its upstream releases.
#[derive(Debug, Clone, Default)]
pub struct UpdateInfo {
    pub app_name: String,
    pub current_version: String,
    pub latest_version: String,
    pub has_update: bool,
    pub prerelease: bool,
    pub original_tag_name: String,
    pub release_url: Option<String>,
    /// Release fetched during the check, reused by the update phase.
    pub release: Option<Arc<Release>>,
    pub error_reason: Option<String>,
}

impl UpdateInfo {
    pub fn failed(app_name: &str, current_version: &str, reason: impl Into<String>) -> Self {
        Self {
            app_name: app_name.to_string(),
            current_version: current_version.to_string(),
            error_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_reason.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub assets: Vec<GitHubAsset>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: Option<String>,
}

impl From<GitHubAsset> for Asset {
    fn from(asset: GitHubAsset) -> Self {
        Asset {
            name: asset.name,
            browser_download_url: asset.browser_download_url,
            size: asset.size,
            digest: asset.digest,
        }
    }
}
