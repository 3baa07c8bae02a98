//! Persistent cache of GitHub release metadata.
//!
//! One JSON file per (owner, repo, channel) under `<cache_dir>/releases/`:
//!
//! ```text
//! releases/
//! ├── owner_repo.json              # stable
//! ├── owner_repo_prerelease.json
//! └── owner_repo_latest.json
//! ```
//!
//! Reads never fail: a missing, stale or corrupt entry is a miss. Corrupt files
//! are deleted on sight.

use crate::error::Result;
use crate::fs_util::{sanitize_component, write_atomic};
use crate::types::{Channel, Release};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const RELEASES_DIR_NAME: &str = "releases";
pub const DEFAULT_TTL_HOURS: u32 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub cached_at: DateTime<Utc>,
    #[serde(default)]
    pub ttl_hours: Option<u32>,
    pub release_data: Release,
}

impl CacheEntry {
    pub fn is_fresh(&self, default_ttl_hours: u32, now: DateTime<Utc>) -> bool {
        let ttl = self.ttl_hours.unwrap_or(default_ttl_hours);
        now - self.cached_at < Duration::hours(i64::from(ttl))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub expired_entries: usize,
    pub corrupted_entries: usize,
}

#[derive(Debug, Clone)]
pub struct ReleaseCache {
    dir: PathBuf,
    ttl_hours: u32,
}

impl ReleaseCache {
    pub fn new(cache_root: impl AsRef<Path>, ttl_hours: u32) -> Self {
        Self {
            dir: cache_root.as_ref().join(RELEASES_DIR_NAME),
            ttl_hours,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cache_file(&self, owner: &str, repo: &str, channel: Channel) -> PathBuf {
        let stem = format!("{}_{}", sanitize_component(owner), sanitize_component(repo));
        let name = match channel {
            Channel::Stable => format!("{}.json", stem),
            other => format!("{}_{}.json", stem, other),
        };
        self.dir.join(name)
    }

    fn read_entry(&self, path: &Path) -> Option<CacheEntry> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not read cache file {}: {}", path.display(), e);
                }
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Removing corrupted cache file {}: {}", path.display(), e);
                if let Err(e) = fs::remove_file(path) {
                    tracing::debug!("Could not remove {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    pub fn get_cached_release(
        &self,
        owner: &str,
        repo: &str,
        channel: Channel,
        ignore_ttl: bool,
    ) -> Option<Release> {
        let path = self.cache_file(owner, repo, channel);
        let entry = self.read_entry(&path)?;

        if !ignore_ttl && !entry.is_fresh(self.ttl_hours, Utc::now()) {
            tracing::debug!("Cache entry for {}/{} ({}) expired", owner, repo, channel);
            return None;
        }

        tracing::debug!("Cache hit for {}/{} ({})", owner, repo, channel);
        Some(entry.release_data)
    }

    pub fn save_release_data(
        &self,
        owner: &str,
        repo: &str,
        channel: Channel,
        release: &Release,
    ) -> Result<()> {
        let entry = CacheEntry {
            cached_at: Utc::now(),
            ttl_hours: Some(self.ttl_hours),
            release_data: release.clone(),
        };
        self.write_entry(owner, repo, channel, &entry)
    }

    pub(crate) fn write_entry(
        &self,
        owner: &str,
        repo: &str,
        channel: Channel,
        entry: &CacheEntry,
    ) -> Result<()> {
        let path = self.cache_file(owner, repo, channel);
        let content = serde_json::to_vec_pretty(entry)?;
        write_atomic(&path, &content)?;
        tracing::debug!("Cached release for {}/{} at {}", owner, repo, path.display());
        Ok(())
    }

    fn cache_files(&self) -> Vec<PathBuf> {
        if !self.dir.exists() {
            return Vec::new();
        }
        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect()
    }

    /// Remove cached entries; scope narrows with `owner` and then `repo`.
    pub fn clear_cache(&self, owner: Option<&str>, repo: Option<&str>) -> Result<usize> {
        let targets: Vec<PathBuf> = match (owner, repo) {
            (Some(owner), Some(repo)) => Channel::ALL
                .iter()
                .map(|channel| self.cache_file(owner, repo, *channel))
                .filter(|p| p.exists())
                .collect(),
            (Some(owner), None) => {
                let prefix = format!("{}_", sanitize_component(owner));
                self.cache_files()
                    .into_iter()
                    .filter(|p| {
                        p.file_name()
                            .map(|n| n.to_string_lossy().starts_with(&prefix))
                            .unwrap_or(false)
                    })
                    .collect()
            }
            _ => self.cache_files(),
        };

        for path in &targets {
            fs::remove_file(path)?;
        }
        tracing::info!("Cleared {} cache entries", targets.len());
        Ok(targets.len())
    }

    /// Delete entries older than `max_age_days`, regardless of their TTL.
    pub fn cleanup_expired(&self, max_age_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let mut removed = 0;

        for path in self.cache_files() {
            let expired = match fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<CacheEntry>(&c).ok())
            {
                Some(entry) => entry.cached_at < cutoff,
                None => true,
            };
            if expired {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} expired cache entries", removed);
        }
        Ok(removed)
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        let now = Utc::now();
        let mut stats = CacheStats::default();

        for path in self.cache_files() {
            stats.total_entries += 1;
            match fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<CacheEntry>(&c).ok())
            {
                Some(entry) if entry.is_fresh(self.ttl_hours, now) => stats.fresh_entries += 1,
                Some(_) => stats.expired_entries += 1,
                None => stats.corrupted_entries += 1,
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Asset;
    use tempfile::tempdir;

    fn release(owner: &str, repo: &str, version: &str) -> Release {
        Release {
            owner: owner.into(),
            repo: repo.into(),
            version: version.into(),
            original_tag_name: format!("v{}", version),
            prerelease: false,
            assets: vec![Asset {
                name: format!("{}.AppImage", repo),
                browser_download_url: format!("https://example.com/{}.AppImage", repo),
                size: 42,
                digest: Some("sha256:abcd".into()),
            }],
            published_at: None,
            html_url: None,
        }
    }

    #[test]
    fn test_cache_file_names() {
        let cache = ReleaseCache::new("/tmp/c", 24);
        assert!(cache
            .cache_file("own", "rep", Channel::Stable)
            .ends_with("releases/own_rep.json"));
        assert!(cache
            .cache_file("own", "rep", Channel::Prerelease)
            .ends_with("releases/own_rep_prerelease.json"));
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let dir = tempdir().unwrap();
        let cache = ReleaseCache::new(dir.path(), 24);
        let data = release("own", "rep", "1.2.0");

        cache.save_release_data("own", "rep", Channel::Stable, &data).unwrap();

        assert_eq!(
            cache.get_cached_release("own", "rep", Channel::Stable, false),
            Some(data)
        );
        assert!(cache
            .get_cached_release("own", "rep", Channel::Prerelease, false)
            .is_none());
    }

    #[test]
    fn test_expired_entry_needs_ignore_ttl() {
        let dir = tempdir().unwrap();
        let cache = ReleaseCache::new(dir.path(), 24);
        let data = release("own", "rep", "1.0.0");
        let entry = CacheEntry {
            cached_at: Utc::now() - Duration::hours(3),
            ttl_hours: Some(2),
            release_data: data.clone(),
        };
        cache.write_entry("own", "rep", Channel::Stable, &entry).unwrap();

        assert!(cache.get_cached_release("own", "rep", Channel::Stable, false).is_none());
        assert_eq!(
            cache.get_cached_release("own", "rep", Channel::Stable, true),
            Some(data)
        );
        // the stale read did not delete the entry
        assert!(cache.cache_file("own", "rep", Channel::Stable).exists());
    }

    #[test]
    fn test_missing_ttl_uses_default() {
        let entry = CacheEntry {
            cached_at: Utc::now() - Duration::hours(5),
            ttl_hours: None,
            release_data: release("o", "r", "1"),
        };
        assert!(entry.is_fresh(6, Utc::now()));
        assert!(!entry.is_fresh(4, Utc::now()));
    }

    #[test]
    fn test_corrupted_entry_is_deleted() {
        let dir = tempdir().unwrap();
        let cache = ReleaseCache::new(dir.path(), 24);
        let path = cache.cache_file("own", "rep", Channel::Stable);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ broken").unwrap();

        assert!(cache.get_cached_release("own", "rep", Channel::Stable, true).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_owner_prevents_collisions() {
        let dir = tempdir().unwrap();
        let cache = ReleaseCache::new(dir.path(), 24);
        cache
            .save_release_data("alice", "app", Channel::Stable, &release("alice", "app", "1.0"))
            .unwrap();
        cache
            .save_release_data("bob", "app", Channel::Stable, &release("bob", "app", "2.0"))
            .unwrap();

        let alice = cache.get_cached_release("alice", "app", Channel::Stable, false).unwrap();
        assert_eq!(alice.version, "1.0");
    }

    #[test]
    fn test_clear_cache_scopes() {
        let dir = tempdir().unwrap();
        let cache = ReleaseCache::new(dir.path(), 24);
        for (owner, repo, channel) in [
            ("a", "x", Channel::Stable),
            ("a", "x", Channel::Prerelease),
            ("a", "y", Channel::Stable),
            ("b", "x", Channel::Stable),
        ] {
            cache
                .save_release_data(owner, repo, channel, &release(owner, repo, "1"))
                .unwrap();
        }

        assert_eq!(cache.clear_cache(Some("a"), Some("x")).unwrap(), 2);
        assert_eq!(cache.clear_cache(Some("a"), None).unwrap(), 1);
        assert_eq!(cache.clear_cache(None, None).unwrap(), 1);
        assert_eq!(cache.get_cache_stats().total_entries, 0);
    }

    #[test]
    fn test_cleanup_expired_by_age() {
        let dir = tempdir().unwrap();
        let cache = ReleaseCache::new(dir.path(), 24);
        let old = CacheEntry {
            cached_at: Utc::now() - Duration::days(10),
            ttl_hours: Some(1_000_000),
            release_data: release("o", "old", "1"),
        };
        cache.write_entry("o", "old", Channel::Stable, &old).unwrap();
        cache
            .save_release_data("o", "new", Channel::Stable, &release("o", "new", "1"))
            .unwrap();

        assert_eq!(cache.cleanup_expired(7).unwrap(), 1);
        assert!(cache.get_cached_release("o", "new", Channel::Stable, false).is_some());
        assert!(cache.get_cached_release("o", "old", Channel::Stable, true).is_none());
    }

    #[test]
    fn test_cache_stats() {
        let dir = tempdir().unwrap();
        let cache = ReleaseCache::new(dir.path(), 24);
        cache
            .save_release_data("o", "fresh", Channel::Stable, &release("o", "fresh", "1"))
            .unwrap();
        let stale = CacheEntry {
            cached_at: Utc::now() - Duration::hours(48),
            ttl_hours: None,
            release_data: release("o", "stale", "1"),
        };
        cache.write_entry("o", "stale", Channel::Stable, &stale).unwrap();
        fs::write(cache.dir().join("junk.json"), "nope").unwrap();

        let stats = cache.get_cache_stats();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.fresh_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.corrupted_entries, 1);
    }
}
