//! Update orchestration: check releases, then download, verify and install.
//!
//! Per app the pipeline runs
//! CHECK → PREPARE → DOWNLOAD → BACKUP → VERIFY → INSTALL → ICON → CONFIG →
//! DESKTOP ENTRY → CLEANUP. Batches fan out one task per app under a semaphore
//! sized by `max_concurrent_downloads`; one app failing never cancels another.

use crate::backup::BackupService;
use crate::cache::ReleaseCache;
use crate::config::{
    AppConfig, ConfigStore, EffectiveAppConfig, GlobalConfig, VerificationState,
};
use crate::download::Fetcher;
use crate::error::{Error, Result};
use crate::fs_util::{move_file, sanitize_component, set_executable};
use crate::github::ReleaseSource;
use crate::hooks::{InstallHooks, NoopHooks};
use crate::platform::{get_system_info, select_appimage_asset};
use crate::progress::{NoopProgress, ProgressReporter};
use crate::types::{normalize_version, Channel, Release, UpdateInfo};
use crate::verification::{VerificationContext, VerificationService};
use chrono::Utc;
use futures_util::future::join_all;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// GitHub requests one app costs in the worst case (release, fallback, checksum file).
pub const REQUESTS_PER_APP: u32 = 3;

pub fn compare_versions(current: &str, latest: &str) -> Ordering {
    let current = normalize_version(current);
    let latest = normalize_version(latest);

    if let (Ok(a), Ok(b)) = (
        semver::Version::parse(&current),
        semver::Version::parse(&latest),
    ) {
        return a.cmp(&b);
    }

    let numeric = |v: &str| -> Option<Vec<u64>> {
        v.split('.').map(|part| part.parse::<u64>().ok()).collect()
    };
    if let (Some(mut a), Some(mut b)) = (numeric(&current), numeric(&latest)) {
        let len = a.len().max(b.len());
        a.resize(len, 0);
        b.resize(len, 0);
        return a.cmp(&b);
    }

    current.cmp(&latest)
}

/// Whether `latest` should replace `current`. Nothing installed counts as outdated.
pub fn is_newer_version(current: &str, latest: &str) -> bool {
    if latest.trim().is_empty() {
        return false;
    }
    if current.trim().is_empty() {
        return true;
    }
    compare_versions(current, latest) == Ordering::Less
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub run: Vec<String>,
    pub deferred: Vec<String>,
}

/// Split `names` into what fits in the remaining request quota and what does not.
pub fn plan_batch(names: &[String], remaining: Option<u32>) -> Result<BatchPlan> {
    let Some(remaining) = remaining else {
        return Ok(BatchPlan {
            run: names.to_vec(),
            deferred: Vec::new(),
        });
    };

    let fits = (remaining / REQUESTS_PER_APP) as usize;
    if fits == 0 && !names.is_empty() {
        return Err(Error::RateLimit {
            remaining,
            required: REQUESTS_PER_APP.saturating_mul(names.len() as u32),
        });
    }

    let split = fits.min(names.len());
    if split < names.len() {
        tracing::warn!(
            "Rate limit allows {} of {} apps ({} requests remaining)",
            split,
            names.len(),
            remaining
        );
    }
    Ok(BatchPlan {
        run: names[..split].to_vec(),
        deferred: names[split..].to_vec(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate {
        version: String,
    },
    Updated {
        from_version: String,
        to_version: String,
        path: PathBuf,
        verification_warning: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub results: BTreeMap<String, bool>,
    pub errors: BTreeMap<String, String>,
}

impl BatchOutcome {
    fn record(&mut self, app_name: String, result: Result<UpdateOutcome>) {
        match result {
            Ok(_) => {
                self.results.insert(app_name, true);
            }
            Err(e) => self.fail(app_name, e.to_string()),
        }
    }

    fn fail(&mut self, app_name: String, reason: String) {
        tracing::error!("Update of {} failed: {}", app_name, reason);
        self.results.insert(app_name.clone(), false);
        self.errors.insert(app_name, reason);
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|ok| **ok).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

fn deferred_reason() -> String {
    "Skipped: GitHub rate limit too low for this batch".to_string()
}

pub struct UpdateManager {
    config_store: Arc<dyn ConfigStore>,
    releases: Arc<dyn ReleaseSource>,
    fetcher: Arc<dyn Fetcher>,
    progress: Arc<dyn ProgressReporter>,
    hooks: Arc<dyn InstallHooks>,
    global: GlobalConfig,
    cache: ReleaseCache,
    backups: BackupService,
    arch: String,
}

impl UpdateManager {
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        releases: Arc<dyn ReleaseSource>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let global = config_store.load_global_config()?;
        let cache = ReleaseCache::new(&global.directory.cache, global.cache_ttl_hours);
        let backups = BackupService::new(
            &global.directory.backup,
            Arc::clone(&config_store),
            global.max_backup,
        );

        Ok(Self {
            config_store,
            releases,
            fetcher,
            progress: Arc::new(NoopProgress),
            hooks: Arc::new(NoopHooks),
            global,
            cache,
            backups,
            arch: get_system_info().arch,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn InstallHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn global_config(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn cache(&self) -> &ReleaseCache {
        &self.cache
    }

    pub fn backups(&self) -> &BackupService {
        &self.backups
    }

    fn load_app(&self, app_name: &str) -> Result<AppConfig> {
        self.config_store
            .load_app_config(app_name)?
            .ok_or_else(|| Error::AppNotInstalled(app_name.to_string()))
    }

    pub fn load_effective_config(&self, app_name: &str) -> Result<EffectiveAppConfig> {
        let app = self.load_app(app_name)?;
        let catalog = match &app.catalog_ref {
            Some(reference) => self.config_store.load_catalog_entry(reference)?,
            None => None,
        };
        EffectiveAppConfig::resolve(app_name, &app, catalog.as_ref())
    }

    async fn fetch_channel(&self, owner: &str, repo: &str, channel: Channel) -> Result<Option<Release>> {
        match channel {
            Channel::Prerelease => self.releases.fetch_prerelease(owner, repo).await,
            Channel::Stable | Channel::Latest => {
                self.releases.fetch_latest_release(owner, repo).await
            }
        }
    }

    /// Newest release for the app's preferred channel, falling back to the other.
    ///
    /// GitHub's "latest" endpoint never returns prereleases, so the order in
    /// which channels are tried depends on the preference. Each channel is
    /// tried from cache then network before moving on to the next one.
    async fn resolve_release(&self, app: &EffectiveAppConfig, refresh_cache: bool) -> Result<Release> {
        let order = if app.prerelease {
            [Channel::Prerelease, Channel::Stable]
        } else {
            [Channel::Stable, Channel::Prerelease]
        };

        for channel in order {
            if !refresh_cache {
                if let Some(release) =
                    self.cache
                        .get_cached_release(&app.owner, &app.repo, channel, false)
                {
                    return Ok(release);
                }
            }

            if let Some(release) = self.fetch_channel(&app.owner, &app.repo, channel).await? {
                if let Err(e) = self
                    .cache
                    .save_release_data(&app.owner, &app.repo, channel, &release)
                {
                    tracing::warn!("Could not cache release for {}: {}", app.app_name, e);
                }
                return Ok(release);
            }
            tracing::debug!("No {} release for {}/{}", channel, app.owner, app.repo);
        }

        Err(Error::ReleaseNotFound {
            owner: app.owner.clone(),
            repo: app.repo.clone(),
        })
    }

    pub async fn check_single_update(&self, app_name: &str, refresh_cache: bool) -> Result<UpdateInfo> {
        let app = self.load_effective_config(app_name)?;
        let release = self.resolve_release(&app, refresh_cache).await?;

        let has_update = is_newer_version(&app.installed_version, &release.version);
        tracing::debug!(
            "{}: installed {:?}, latest {} (update: {})",
            app_name,
            app.installed_version,
            release.version,
            has_update
        );

        Ok(UpdateInfo {
            app_name: app_name.to_string(),
            current_version: app.installed_version.clone(),
            latest_version: release.version.clone(),
            has_update,
            prerelease: release.prerelease,
            original_tag_name: release.original_tag_name.clone(),
            release_url: release.html_url.clone(),
            release: Some(Arc::new(release)),
            error_reason: None,
        })
    }

    fn semaphore(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.global.max_concurrent_downloads.max(1)))
    }

    /// Check several apps (all installed apps when `app_names` is `None`).
    /// Per-app failures come back as `UpdateInfo::error_reason`.
    pub async fn check_updates(
        self: &Arc<Self>,
        app_names: Option<&[String]>,
        refresh_cache: bool,
    ) -> Result<Vec<UpdateInfo>> {
        let names = match app_names {
            Some(names) => names.to_vec(),
            None => self.config_store.list_installed_apps()?,
        };
        let plan = plan_batch(&names, self.releases.rate_limit_remaining())?;
        let semaphore = self.semaphore();

        let handles: Vec<_> = plan
            .run
            .iter()
            .cloned()
            .map(|name| {
                let manager = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.ok();
                    match manager.check_single_update(&name, refresh_cache).await {
                        Ok(info) => info,
                        Err(e) => {
                            tracing::warn!("Update check for {} failed: {}", name, e);
                            let current = manager.installed_version(&name);
                            UpdateInfo::failed(&name, &current, e.to_string())
                        }
                    }
                })
            })
            .collect();

        let mut infos: Vec<UpdateInfo> = join_all(handles)
            .await
            .into_iter()
            .zip(plan.run.iter())
            .map(|(joined, name)| {
                joined.unwrap_or_else(|e| UpdateInfo::failed(name, "", format!("task panicked: {}", e)))
            })
            .collect();
        infos.extend(
            plan.deferred
                .iter()
                .map(|name| UpdateInfo::failed(name, &self.installed_version(name), deferred_reason())),
        );
        Ok(infos)
    }

    fn installed_version(&self, app_name: &str) -> String {
        self.config_store
            .load_app_config(app_name)
            .ok()
            .flatten()
            .map(|c| c.state.version)
            .unwrap_or_default()
    }

    pub async fn update_single_app(
        &self,
        app_name: &str,
        force: bool,
        update_info: Option<UpdateInfo>,
    ) -> Result<UpdateOutcome> {
        // CHECK
        let info = match update_info {
            Some(info) if !force && info.release.is_some() && !info.is_error() => {
                tracing::debug!("Reusing release data from check for {}", app_name);
                info
            }
            _ => self.check_single_update(app_name, force).await?,
        };

        if !info.has_update && !force {
            tracing::info!("{} is up to date ({})", app_name, info.current_version);
            return Ok(UpdateOutcome::UpToDate {
                version: info.current_version,
            });
        }

        // PREPARE
        let app = self.load_effective_config(app_name)?;
        let release = info.release.clone().ok_or_else(|| Error::ReleaseNotFound {
            owner: app.owner.clone(),
            repo: app.repo.clone(),
        })?;
        let asset = select_appimage_asset(&release.assets, &self.arch, &app.preferred_suffixes)
            .ok_or_else(|| Error::AssetNotFound {
                owner: app.owner.clone(),
                repo: app.repo.clone(),
                tag: release.original_tag_name.clone(),
            })?;
        let install_path = self.global.directory.storage.join(app.install_file_name());
        let download_path = self
            .global
            .directory
            .download
            .join(sanitize_component(app_name))
            .join(&asset.name);

        // DOWNLOAD
        self.fetcher
            .download(&asset.browser_download_url, &download_path, self.progress.as_ref())
            .await?;

        // BACKUP
        let previous = app
            .installed_path
            .clone()
            .filter(|p| p.is_file())
            .unwrap_or_else(|| install_path.clone());
        self.backup_previous(&app, &previous).await;

        // VERIFY
        let verifier = VerificationService::new(Arc::clone(&self.fetcher))
            .with_progress(Arc::clone(&self.progress));
        let ctx = VerificationContext {
            app_name,
            file_path: &download_path,
            asset,
            config: &app.verification,
            all_assets: &release.assets,
            owner: &app.owner,
            repo: &app.repo,
            tag_name: &release.original_tag_name,
        };
        let verification = match verifier.verify_file(&ctx).await {
            Ok(result) => result,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&download_path).await {
                    tracing::debug!("Could not remove {}: {}", download_path.display(), rm);
                }
                return Err(e);
            }
        };
        if let Some(warning) = &verification.warning {
            tracing::warn!("{}: {}", app_name, warning);
        }

        // INSTALL
        {
            let src = download_path.clone();
            let dest = install_path.clone();
            blocking(move || {
                move_file(&src, &dest)?;
                set_executable(&dest)?;
                // Only succeeds once the per-app download dir is empty.
                if let Some(dir) = src.parent() {
                    let _ = std::fs::remove_dir(dir);
                }
                Ok(())
            })
            .await?;
        }
        if let Some(old) = app.installed_path.as_deref() {
            if old != install_path && old.is_file() {
                match std::fs::remove_file(old) {
                    Ok(()) => tracing::debug!("Removed previous file {}", old.display()),
                    Err(e) => tracing::warn!("Could not remove {}: {}", old.display(), e),
                }
            }
        }
        tracing::info!("Installed {} {} to {}", app_name, release.version, install_path.display());

        // ICON
        if let Err(e) = self.hooks.setup_icon(&app, &install_path) {
            tracing::warn!("Icon setup for {} failed: {}", app_name, e);
        }

        // CONFIG
        let mut config = self.load_app(app_name)?;
        config.state.version = release.version.clone();
        config.state.installed_path = Some(install_path.clone());
        config.state.installed_date = Some(Utc::now());
        config.state.verification = Some(VerificationState {
            passed: verification.passed,
            methods: verification.method_names(),
            warning: verification.warning.clone(),
        });
        if verification.updated_config != app.verification {
            tracing::info!("Persisting amended verification settings for {}", app_name);
            config.verification = Some(verification.updated_config.clone());
        }
        self.config_store.save_app_config(app_name, &config)?;

        // DESKTOP ENTRY
        if let Err(e) = self.hooks.update_desktop_entry(&app, &install_path) {
            tracing::warn!("Desktop entry update for {} failed: {}", app_name, e);
        }

        // CLEANUP
        let backups = self.backups.clone();
        let name = app_name.to_string();
        if let Err(e) = blocking(move || backups.cleanup_old_backups(Some(&name))).await {
            tracing::warn!("Backup cleanup for {} failed: {}", app_name, e);
        }

        Ok(UpdateOutcome::Updated {
            from_version: app.installed_version.clone(),
            to_version: release.version.clone(),
            path: install_path,
            verification_warning: verification.warning,
        })
    }

    async fn backup_previous(&self, app: &EffectiveAppConfig, previous: &Path) {
        if !previous.is_file() {
            return;
        }
        let backups = self.backups.clone();
        let path = previous.to_path_buf();
        let name = app.app_name.clone();
        let version = Some(app.installed_version.clone()).filter(|v| !v.is_empty());

        let result =
            blocking(move || backups.create_backup(&path, &name, version.as_deref())).await;
        if let Err(e) = result {
            tracing::warn!("Backup of {} failed, continuing: {}", app.app_name, e);
        }
    }

    /// Update `app_names` concurrently. Fails only when the rate limit leaves
    /// room for no app at all.
    pub async fn update_multiple_apps(
        self: &Arc<Self>,
        app_names: &[String],
        force: bool,
    ) -> Result<BatchOutcome> {
        let plan = plan_batch(app_names, self.releases.rate_limit_remaining())?;
        let jobs = plan.run.into_iter().map(|name| (name, None)).collect();
        Ok(self.run_batch(jobs, plan.deferred, force).await)
    }

    /// Update the apps a prior `check_updates` found outdated, reusing its releases.
    /// Up-to-date apps are reported as successful no-ops.
    pub async fn update_from_check(
        self: &Arc<Self>,
        infos: Vec<UpdateInfo>,
        force: bool,
    ) -> Result<BatchOutcome> {
        let mut settled = BatchOutcome::default();
        let mut pending: BTreeMap<String, UpdateInfo> = BTreeMap::new();

        for info in infos {
            if let Some(reason) = &info.error_reason {
                settled.fail(info.app_name.clone(), reason.clone());
            } else if info.has_update || force {
                pending.insert(info.app_name.clone(), info);
            } else {
                settled.record(
                    info.app_name.clone(),
                    Ok(UpdateOutcome::UpToDate {
                        version: info.current_version,
                    }),
                );
            }
        }

        let names: Vec<String> = pending.keys().cloned().collect();
        let plan = plan_batch(&names, self.releases.rate_limit_remaining())?;
        let jobs = plan
            .run
            .into_iter()
            .map(|name| {
                let info = pending.remove(&name);
                (name, info)
            })
            .collect();

        let mut outcome = self.run_batch(jobs, plan.deferred, force).await;
        outcome.results.extend(settled.results);
        outcome.errors.extend(settled.errors);
        Ok(outcome)
    }

    async fn run_batch(
        self: &Arc<Self>,
        jobs: Vec<(String, Option<UpdateInfo>)>,
        deferred: Vec<String>,
        force: bool,
    ) -> BatchOutcome {
        let semaphore = self.semaphore();
        let (names, handles): (Vec<String>, Vec<_>) = jobs
            .into_iter()
            .map(|(name, info)| {
                let manager = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let task_name = name.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.ok();
                    manager.update_single_app(&task_name, force, info).await
                });
                (name, handle)
            })
            .unzip();

        let mut outcome = BatchOutcome::default();
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(result) => outcome.record(name, result),
                Err(e) => outcome.fail(name, format!("task panicked: {}", e)),
            }
        }
        for name in deferred {
            outcome.fail(name, deferred_reason());
        }

        tracing::info!(
            "Batch finished: {} updated, {} failed",
            outcome.succeeded(),
            outcome.failed()
        );
        outcome
    }
}
