//! Figuring out which verification methods a release offers for an asset.

use crate::config::VerificationConfig;
use crate::types::{Asset, ChecksumFileInfo, ChecksumFormat};
use regex::Regex;
use std::sync::OnceLock;

const CHECKSUM_SUFFIXES: [&str; 8] = [
    ".sha256",
    ".sha512",
    ".sha256sum",
    ".sha512sum",
    ".digest",
    ".yml",
    ".yaml",
    ".sha256.txt",
];

const CHECKSUM_NAME_MARKERS: [&str; 3] = ["sha256sums", "sha512sums", "checksums"];

const ALGO_SUFFIXES: [&str; 6] = ["sha256", "sha512", "sha256sum", "sha512sum", "sha1", "md5"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedMethods {
    pub has_digest: bool,
    pub checksum_files: Vec<ChecksumFileInfo>,
}

impl DetectedMethods {
    pub fn has_strong_method(&self) -> bool {
        self.has_digest || !self.checksum_files.is_empty()
    }
}

pub fn is_checksum_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    CHECKSUM_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
        || CHECKSUM_NAME_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Expand `{version}`, `{tag}` and `{asset_name}` in a configured checksum filename.
pub fn render_checksum_template(template: &str, tag: &str, asset_name: &str) -> String {
    let version = tag.strip_prefix('v').unwrap_or(tag);
    template
        .replace("{version}", version)
        .replace("{tag}", tag)
        .replace("{asset_name}", asset_name)
}

fn release_download_url(owner: &str, repo: &str, tag: &str, filename: &str) -> String {
    format!(
        "https://github.com/{}/{}/releases/download/{}/{}",
        owner, repo, tag, filename
    )
}

pub fn detect_available_methods(
    asset: &Asset,
    config: &VerificationConfig,
    all_assets: &[Asset],
    owner: &str,
    repo: &str,
    tag: &str,
) -> DetectedMethods {
    let has_digest = asset.digest().is_some();

    let checksum_files = if let Some(template) = config
        .checksum_file
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    {
        let filename = render_checksum_template(template.trim(), tag, &asset.name);
        let url = if filename.contains("://") {
            filename.clone()
        } else {
            all_assets
                .iter()
                .find(|a| a.name == filename)
                .map(|a| a.browser_download_url.clone())
                .unwrap_or_else(|| release_download_url(owner, repo, tag, &filename))
        };
        let name = filename.rsplit('/').next().unwrap_or(&filename).to_string();
        tracing::debug!("Using configured checksum file {}", name);
        vec![ChecksumFileInfo::new(name, url)]
    } else if config.digest {
        tracing::debug!("Digest verification forced, skipping checksum file detection");
        Vec::new()
    } else {
        all_assets
            .iter()
            .filter(|a| a.name != asset.name && is_checksum_file(&a.name))
            .map(|a| ChecksumFileInfo::new(a.name.clone(), a.browser_download_url.clone()))
            .collect()
    };

    DetectedMethods {
        has_digest,
        checksum_files,
    }
}

fn prerelease_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(^|[-_.])(alpha|beta|rc\d*|nightly|experimental|dev|canary)([-_.]|$)")
            .expect("prerelease marker pattern is valid")
    })
}

fn priority_tier(file: &ChecksumFileInfo, target: &str) -> u32 {
    let name = file.filename.to_lowercase();
    let target = target.to_lowercase();

    if name == format!("{}.digest", target) {
        return 0;
    }
    if let Some(rest) = name.strip_prefix(&format!("{}.", target)) {
        if ALGO_SUFFIXES.contains(&rest) {
            return 1;
        }
    }
    if file.format == ChecksumFormat::Yaml {
        return 2;
    }
    if name.ends_with(".digest") {
        return 3;
    }
    4
}

/// Rank checksum files for `target`; only the first one is ever fetched.
pub fn prioritize_checksum_files(
    files: &[ChecksumFileInfo],
    target: &str,
) -> Vec<ChecksumFileInfo> {
    let mut ranked: Vec<(u32, &ChecksumFileInfo)> = files
        .iter()
        .map(|file| {
            let penalty = if prerelease_marker().is_match(&file.filename) {
                5
            } else {
                0
            };
            (priority_tier(file, target) * 10 + penalty, file)
        })
        .collect();

    ranked.sort_by(|(a_rank, a), (b_rank, b)| a_rank.cmp(b_rank).then(a.filename.cmp(&b.filename)));
    ranked.into_iter().map(|(_, file)| file.clone()).collect()
}

/// Decide whether to skip, and the config that reflects the decision.
///
/// A configured skip stands only while no strong method exists; otherwise it is
/// turned off in the returned config.
pub fn resolve_skip(
    config: &VerificationConfig,
    detected: &DetectedMethods,
) -> (bool, VerificationConfig) {
    if !config.skip {
        return (false, config.clone());
    }
    if detected.has_strong_method() {
        tracing::info!("Verification skip overridden: digest or checksum file is available");
        let updated = VerificationConfig {
            skip: false,
            ..config.clone()
        };
        return (false, updated);
    }
    (true, config.clone())
}
