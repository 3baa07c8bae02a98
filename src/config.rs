use crate::error::{Error, Result};
use crate::fs_util::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "appkeep";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const APPS_DIR_NAME: &str = "apps";
pub const CATALOG_DIR_NAME: &str = "catalog";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryConfig {
    #[serde(default = "default_storage_dir")]
    pub storage: PathBuf,
    #[serde(default = "default_backup_dir")]
    pub backup: PathBuf,
    #[serde(default = "default_icon_dir")]
    pub icon: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache: PathBuf,
    #[serde(default = "default_download_dir")]
    pub download: PathBuf,
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
fn default_storage_dir() -> PathBuf {
    home_dir().join("Applications")
}
fn default_backup_dir() -> PathBuf {
    default_storage_dir().join("backups")
}
fn default_icon_dir() -> PathBuf {
    default_storage_dir().join("icons")
}
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| home_dir().join(".cache"))
        .join(APP_NAME)
}
fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| home_dir().join("Downloads"))
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            storage: default_storage_dir(),
            backup: default_backup_dir(),
            icon: default_icon_dir(),
            cache: default_cache_dir(),
            download: default_download_dir(),
        }
    }
}

impl DirectoryConfig {
    /// Lay every directory out under one root; used by tests and portable setups.
    pub fn under(root: &Path) -> Self {
        Self {
            storage: root.join("apps"),
            backup: root.join("backups"),
            icon: root.join("icons"),
            cache: root.join("cache"),
            download: root.join("downloads"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalConfig {
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_max_backup")]
    pub max_backup: usize,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u32,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

fn default_max_concurrent_downloads() -> usize {
    5
}
fn default_max_backup() -> usize {
    1
}
fn default_cache_ttl_hours() -> u32 {
    24
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_backup: default_max_backup(),
            cache_ttl_hours: default_cache_ttl_hours(),
            directory: DirectoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VerificationConfig {
    /// User asked to skip verification. Only honored when nothing to verify with exists.
    #[serde(default)]
    pub skip: bool,
    /// Force digest verification and skip checksum-file auto-detection.
    #[serde(default)]
    pub digest: bool,
    /// Explicit checksum asset name; may contain `{version}`, `{tag}`, `{asset_name}`.
    #[serde(default)]
    pub checksum_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SourceOverrides {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub prerelease: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppImageOverrides {
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub preferred_suffixes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VerificationState {
    pub passed: bool,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppState {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub installed_path: Option<PathBuf>,
    #[serde(default)]
    pub installed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification: Option<VerificationState>,
}

/// Per-app config as persisted in `apps/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub catalog_ref: Option<String>,
    #[serde(default)]
    pub source: SourceOverrides,
    #[serde(default)]
    pub appimage: AppImageOverrides,
    #[serde(default)]
    pub verification: Option<VerificationConfig>,
    #[serde(default)]
    pub state: AppState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CatalogAppImage {
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub preferred_suffixes: Vec<String>,
}

/// Shared defaults for a well-known app, stored in `catalog/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub appimage: CatalogAppImage,
    #[serde(default)]
    pub verification: VerificationConfig,
}

/// Catalog defaults merged with per-app overrides. Never written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveAppConfig {
    pub app_name: String,
    pub owner: String,
    pub repo: String,
    pub prerelease: bool,
    pub rename: String,
    pub preferred_suffixes: Vec<String>,
    pub verification: VerificationConfig,
    pub installed_version: String,
    pub installed_path: Option<PathBuf>,
}

impl EffectiveAppConfig {
    pub fn resolve(
        app_name: &str,
        app: &AppConfig,
        catalog: Option<&CatalogEntry>,
    ) -> Result<Self> {
        if let Some(reference) = &app.catalog_ref {
            if catalog.is_none() {
                return Err(Error::config(
                    app_name,
                    format!("catalog entry '{}' not found", reference),
                ));
            }
        }

        let owner = app
            .source
            .owner
            .clone()
            .or_else(|| catalog.map(|c| c.owner.clone()))
            .filter(|o| !o.is_empty())
            .ok_or_else(|| Error::config(app_name, "missing source owner"))?;
        let repo = app
            .source
            .repo
            .clone()
            .or_else(|| catalog.map(|c| c.repo.clone()))
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::config(app_name, "missing source repo"))?;

        let prerelease = app
            .source
            .prerelease
            .unwrap_or_else(|| catalog.is_some_and(|c| c.prerelease));

        let rename = app
            .appimage
            .rename
            .clone()
            .or_else(|| catalog.and_then(|c| c.appimage.rename.clone()))
            .unwrap_or_else(|| app_name.to_string());

        let preferred_suffixes = app
            .appimage
            .preferred_suffixes
            .clone()
            .or_else(|| catalog.map(|c| c.appimage.preferred_suffixes.clone()))
            .unwrap_or_default();

        let verification = app
            .verification
            .clone()
            .or_else(|| catalog.map(|c| c.verification.clone()))
            .unwrap_or_default();

        Ok(Self {
            app_name: app_name.to_string(),
            owner,
            repo,
            prerelease,
            rename,
            preferred_suffixes,
            verification,
            installed_version: app.state.version.clone(),
            installed_path: app.state.installed_path.clone(),
        })
    }

    pub fn install_file_name(&self) -> String {
        if self.rename.to_lowercase().ends_with(".appimage") {
            self.rename.clone()
        } else {
            format!("{}.AppImage", self.rename)
        }
    }
}

/// Where app and global configuration live.
pub trait ConfigStore: Send + Sync {
    fn load_global_config(&self) -> Result<GlobalConfig>;
    fn load_app_config(&self, app_name: &str) -> Result<Option<AppConfig>>;
    fn save_app_config(&self, app_name: &str, config: &AppConfig) -> Result<()>;
    fn list_installed_apps(&self) -> Result<Vec<String>>;
    fn load_catalog_entry(&self, name: &str) -> Result<Option<CatalogEntry>>;
}

/// JSON files under one config directory.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    root: PathBuf,
}

impl JsonConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `APPKEEP_CONFIG_DIR`, falling back to the platform config dir.
    pub fn from_env() -> Result<Self> {
        if let Ok(dir) = std::env::var("APPKEEP_CONFIG_DIR") {
            return Ok(Self::new(dir));
        }
        let path = dirs::config_dir()
            .ok_or_else(|| Error::config(APP_NAME, "could not determine config directory"))?
            .join(APP_NAME);
        tracing::debug!("Config directory: {}", path.display());
        Ok(Self::new(path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE_NAME)
    }

    fn app_path(&self, app_name: &str) -> PathBuf {
        self.root.join(APPS_DIR_NAME).join(format!("{}.json", app_name))
    }

    fn catalog_path(&self, name: &str) -> PathBuf {
        self.root
            .join(CATALOG_DIR_NAME)
            .join(format!("{}.json", name))
    }

    pub fn save_global_config(&self, config: &GlobalConfig) -> Result<()> {
        let content = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.settings_path(), &content)?;
        Ok(())
    }

    pub fn save_catalog_entry(&self, name: &str, entry: &CatalogEntry) -> Result<()> {
        let content = serde_json::to_vec_pretty(entry)?;
        write_atomic(&self.catalog_path(name), &content)?;
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, owner: &str) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map(Some).map_err(|e| {
        Error::config(
            owner,
            format!("could not parse {}: {}", path.display(), e),
        )
    })
}

impl ConfigStore for JsonConfigStore {
    fn load_global_config(&self) -> Result<GlobalConfig> {
        let mut config: GlobalConfig =
            read_json(&self.settings_path(), APP_NAME)?.unwrap_or_default();

        // Apply environment variable overrides
        if let Ok(value) = std::env::var("APPKEEP_MAX_CONCURRENT_DOWNLOADS") {
            if let Ok(value) = value.parse::<usize>() {
                config.max_concurrent_downloads = value;
            }
        }

        if let Ok(value) = std::env::var("APPKEEP_MAX_BACKUP") {
            if let Ok(value) = value.parse::<usize>() {
                config.max_backup = value;
            }
        }

        Ok(config)
    }

    fn load_app_config(&self, app_name: &str) -> Result<Option<AppConfig>> {
        read_json(&self.app_path(app_name), app_name)
    }

    fn save_app_config(&self, app_name: &str, config: &AppConfig) -> Result<()> {
        let content = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.app_path(app_name), &content)?;
        Ok(())
    }

    fn list_installed_apps(&self) -> Result<Vec<String>> {
        let dir = self.root.join(APPS_DIR_NAME);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut apps: Vec<String> = fs::read_dir(&dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        apps.sort();
        Ok(apps)
    }

    fn load_catalog_entry(&self, name: &str) -> Result<Option<CatalogEntry>> {
        read_json(&self.catalog_path(name), name)
    }
}

pub fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() {
                format!("_{}", c.to_lowercase())
            } else {
                c.to_string()
            }
        })
        .collect::<String>()
        .to_lowercase()
}
