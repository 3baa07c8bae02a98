//! Versioned backups of installed AppImages.
//!
//! Each app gets `<backup_dir>/<app>/` holding `<stem>-<version><ext>` copies and
//! a `metadata.json` index keyed by version. A metadata entry is only written
//! after its file has been atomically moved into place.

use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::fs_util::{copy_atomic, sanitize_component, set_executable, write_atomic};
use crate::verification::hasher::sha256_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

pub const METADATA_FILE_NAME: &str = "metadata.json";
const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupEntry {
    pub filename: String,
    pub sha256: String,
    pub created: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupMetadata {
    #[serde(default)]
    pub versions: BTreeMap<String, BackupEntry>,
}

impl BackupMetadata {
    /// Versions ordered newest first.
    fn newest_first(&self) -> Vec<(&String, &BackupEntry)> {
        let mut entries: Vec<_> = self.versions.iter().collect();
        entries.sort_by(|(_, a), (_, b)| b.created.cmp(&a.created));
        entries
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub version: String,
    pub path: PathBuf,
    pub sha256: String,
    pub created: DateTime<Utc>,
    pub size: u64,
}

#[derive(Clone)]
pub struct BackupService {
    backup_dir: PathBuf,
    config_store: Arc<dyn ConfigStore>,
    max_backup: usize,
}

impl BackupService {
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        config_store: Arc<dyn ConfigStore>,
        max_backup: usize,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            config_store,
            max_backup,
        }
    }

    pub fn app_dir(&self, app_name: &str) -> PathBuf {
        self.backup_dir.join(app_name)
    }

    fn metadata_path(&self, app_name: &str) -> PathBuf {
        self.app_dir(app_name).join(METADATA_FILE_NAME)
    }

    fn load_metadata(&self, app_name: &str) -> Result<BackupMetadata> {
        let path = self.metadata_path(app_name);
        if !path.exists() {
            return Ok(BackupMetadata::default());
        }

        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                let mut corrupted = path.clone().into_os_string();
                corrupted.push(".corrupted");
                tracing::warn!(
                    "Backup metadata for {} is corrupted ({}), moving it aside",
                    app_name,
                    e
                );
                fs::rename(&path, &corrupted)?;
                let empty = BackupMetadata::default();
                self.save_metadata(app_name, &empty)?;
                Ok(empty)
            }
        }
    }

    fn save_metadata(&self, app_name: &str, metadata: &BackupMetadata) -> Result<()> {
        let content = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&self.metadata_path(app_name), &content)?;
        Ok(())
    }

    fn installed_version(&self, app_name: &str) -> Option<String> {
        match self.config_store.load_app_config(app_name) {
            Ok(Some(config)) if !config.state.version.is_empty() => Some(config.state.version),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Could not read state for {}: {}", app_name, e);
                None
            }
        }
    }

    /// Copy `file_path` into the app's backup directory.
    ///
    /// Returns `Ok(None)` when there is nothing to back up.
    pub fn create_backup(
        &self,
        file_path: &Path,
        app_name: &str,
        version: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        if !file_path.is_file() {
            tracing::debug!("Nothing to back up at {}", file_path.display());
            return Ok(None);
        }

        let version = version
            .map(str::to_string)
            .filter(|v| !v.is_empty())
            .or_else(|| self.installed_version(app_name))
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        let stem = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| app_name.to_string());
        let ext = file_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let filename = format!("{}-{}{}", stem, sanitize_component(&version), ext);
        let dest = self.app_dir(app_name).join(&filename);

        let size = copy_atomic(file_path, &dest)
            .map_err(|e| Error::backup(app_name, format!("copy failed: {}", e)))?;
        let sha256 = sha256_file(&dest)?;

        let mut metadata = self.load_metadata(app_name)?;
        metadata.versions.insert(
            version.clone(),
            BackupEntry {
                filename,
                sha256,
                created: Utc::now(),
                size,
            },
        );
        self.save_metadata(app_name, &metadata)?;

        tracing::info!("Backed up {} {} to {}", app_name, version, dest.display());
        Ok(Some(dest))
    }

    /// Backups for `app_name`, newest first.
    pub fn get_backup_info(&self, app_name: &str) -> Result<Vec<BackupInfo>> {
        let metadata = self.load_metadata(app_name)?;
        let dir = self.app_dir(app_name);
        Ok(metadata
            .newest_first()
            .into_iter()
            .map(|(version, entry)| BackupInfo {
                version: version.clone(),
                path: dir.join(&entry.filename),
                sha256: entry.sha256.clone(),
                created: entry.created,
                size: entry.size,
            })
            .collect())
    }

    /// Apply the retention limit to one app, or to every app with backups.
    /// Returns how many backups were removed.
    pub fn cleanup_old_backups(&self, app_name: Option<&str>) -> Result<usize> {
        let apps = match app_name {
            Some(name) => vec![name.to_string()],
            None => self.list_apps_with_backups()?,
        };

        let mut removed = 0;
        for app in apps {
            removed += self.cleanup_app(&app)?;
        }
        Ok(removed)
    }

    fn cleanup_app(&self, app_name: &str) -> Result<usize> {
        let dir = self.app_dir(app_name);
        if !dir.exists() {
            return Ok(0);
        }

        if self.max_backup == 0 {
            let count = self.load_metadata(app_name)?.versions.len();
            fs::remove_dir_all(&dir)?;
            tracing::info!("Removed all backups for {}", app_name);
            return Ok(count);
        }

        let mut metadata = self.load_metadata(app_name)?;
        let evicted: Vec<String> = metadata
            .newest_first()
            .into_iter()
            .skip(self.max_backup)
            .map(|(version, _)| version.clone())
            .collect();

        for version in &evicted {
            if let Some(entry) = metadata.versions.remove(version) {
                let path = dir.join(&entry.filename);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                tracing::debug!("Removed old backup {}", path.display());
            }
        }

        if !evicted.is_empty() {
            self.save_metadata(app_name, &metadata)?;
            tracing::info!("Removed {} old backups for {}", evicted.len(), app_name);
        }
        Ok(evicted.len())
    }

    /// Recompute the sha256 of a stored backup and compare it to the metadata.
    pub fn verify_backup_integrity(&self, app_name: &str, version: &str) -> Result<bool> {
        let metadata = self.load_metadata(app_name)?;
        let entry = metadata.versions.get(version).ok_or_else(|| {
            Error::backup(app_name, format!("no backup for version {}", version))
        })?;

        let path = self.app_dir(app_name).join(&entry.filename);
        if !path.is_file() {
            tracing::warn!("Backup file {} is missing", path.display());
            return Ok(false);
        }

        let actual = sha256_file(&path)?;
        let ok = actual.eq_ignore_ascii_case(&entry.sha256);
        if !ok {
            tracing::warn!(
                "Backup {} checksum mismatch: expected {}, got {}",
                path.display(),
                entry.sha256,
                actual
            );
        }
        Ok(ok)
    }

    pub fn restore_latest_backup(&self, app_name: &str, destination_dir: &Path) -> Result<PathBuf> {
        let latest = self
            .get_backup_info(app_name)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::backup(app_name, "no backups available"))?;
        self.restore_specific_version(app_name, &latest.version, destination_dir)
    }

    pub fn restore_specific_version(
        &self,
        app_name: &str,
        version: &str,
        destination_dir: &Path,
    ) -> Result<PathBuf> {
        if !self.verify_backup_integrity(app_name, version)? {
            return Err(Error::backup(
                app_name,
                format!("backup for version {} failed integrity check", version),
            ));
        }

        let metadata = self.load_metadata(app_name)?;
        let entry = metadata
            .versions
            .get(version)
            .ok_or_else(|| Error::backup(app_name, format!("no backup for version {}", version)))?;
        let source = self.app_dir(app_name).join(&entry.filename);

        let mut app_config = self.config_store.load_app_config(app_name)?;
        let file_name = app_config
            .as_ref()
            .and_then(|c| c.state.installed_path.as_ref())
            .and_then(|p| p.file_name())
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| format!("{}.AppImage", app_name).into());
        let destination = destination_dir.join(file_name);

        let current_version = app_config.as_ref().map(|c| c.state.version.as_str());
        if destination.is_file() && current_version != Some(version) {
            if let Err(e) = self.create_backup(&destination, app_name, current_version) {
                tracing::warn!("Could not back up current {} before restore: {}", app_name, e);
            }
        }

        copy_atomic(&source, &destination)?;
        set_executable(&destination)?;

        if let Some(config) = app_config.as_mut() {
            config.state.version = version.to_string();
            config.state.installed_path = Some(destination.clone());
            config.state.installed_date = Some(Utc::now());
            self.config_store.save_app_config(app_name, config)?;
        }

        tracing::info!("Restored {} {} to {}", app_name, version, destination.display());
        Ok(destination)
    }

    pub fn list_apps_with_backups(&self) -> Result<Vec<String>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let mut apps: Vec<String> = WalkDir::new(&self.backup_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir() && e.path().join(METADATA_FILE_NAME).exists())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        apps.sort();
        Ok(apps)
    }
}
