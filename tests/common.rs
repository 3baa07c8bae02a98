use appkeep::config::{AppConfig, DirectoryConfig, GlobalConfig, SourceOverrides};
use appkeep::platform::filter_release_assets;
use appkeep::progress::ProgressReporter;
use appkeep::{Asset, ConfigStore, Error, Fetcher, JsonConfigStore, Release, ReleaseSource};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// Shared by several test binaries; each uses a different subset.
#[allow(dead_code)]
pub struct TestContext {
    pub _temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub bin_path: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");
        let bin_path = PathBuf::from(env!("CARGO_BIN_EXE_appkeep"));

        Self {
            _temp_dir: temp_dir,
            config_dir,
            bin_path,
        }
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.env("APPKEEP_CONFIG_DIR", &self.config_dir);
        cmd.env_remove("APPKEEP_MAX_BACKUP");
        cmd.env_remove("APPKEEP_MAX_CONCURRENT_DOWNLOADS");
        // Isolate every platform directory inside the temp dir
        cmd.env("HOME", self._temp_dir.path());
        cmd.env("XDG_CACHE_HOME", self._temp_dir.path().join("cache"));
        cmd.env("XDG_CONFIG_HOME", self._temp_dir.path().join("xdg-config"));
        cmd.env("XDG_DATA_HOME", self._temp_dir.path().join("data"));
        cmd
    }
}

#[allow(dead_code)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

#[allow(dead_code)]
impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.status.success() {
            panic!(
                "Command failed with status {:?}\nstdout: {}\nstderr: {}",
                self.status.code(),
                self.stdout,
                self.stderr
            );
        }
        self
    }

    pub fn assert_failure(&self) -> &Self {
        assert!(
            !self.status.success(),
            "Command unexpectedly succeeded\nstdout: {}",
            self.stdout
        );
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Stdout did not contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }
}

#[allow(dead_code)]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[allow(dead_code)]
pub fn download_url(repo: &str, name: &str) -> String {
    format!("https://downloads.test/{}/{}", repo, name)
}

/// AppImage asset carrying a correct GitHub digest for `content`.
#[allow(dead_code)]
pub fn appimage_asset(repo: &str, name: &str, content: &[u8]) -> Asset {
    Asset {
        name: name.to_string(),
        browser_download_url: download_url(repo, name),
        size: content.len() as u64,
        digest: Some(format!("sha256:{}", sha256_hex(content))),
    }
}

#[allow(dead_code)]
pub fn release(owner: &str, repo: &str, tag: &str, prerelease: bool, assets: Vec<Asset>) -> Release {
    Release {
        owner: owner.to_string(),
        repo: repo.to_string(),
        version: tag.trim_start_matches('v').to_string(),
        original_tag_name: tag.to_string(),
        prerelease,
        assets,
        published_at: None,
        html_url: Some(format!("https://github.com/{}/{}/releases/tag/{}", owner, repo, tag)),
    }
}

/// In-memory GitHub.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeReleaseSource {
    stable: Mutex<HashMap<String, Release>>,
    prerelease: Mutex<HashMap<String, Release>>,
    failing: Mutex<HashSet<String>>,
    remaining: Mutex<Option<u32>>,
    pub calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeReleaseSource {
    fn key(owner: &str, repo: &str) -> String {
        format!("{}/{}", owner, repo)
    }

    /// Assets are filtered for x86_64, as `GitHubClient` does for the host.
    pub fn add_release(&self, mut release: Release) {
        release.assets = filter_release_assets(release.assets, "x86_64");
        let key = Self::key(&release.owner, &release.repo);
        let map = if release.prerelease {
            &self.prerelease
        } else {
            &self.stable
        };
        map.lock().unwrap().insert(key, release);
    }

    pub fn fail_repo(&self, owner: &str, repo: &str) {
        self.failing.lock().unwrap().insert(Self::key(owner, repo));
    }

    pub fn set_remaining(&self, remaining: Option<u32>) {
        *self.remaining.lock().unwrap() = remaining;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(
        &self,
        map: &Mutex<HashMap<String, Release>>,
        owner: &str,
        repo: &str,
    ) -> appkeep::Result<Option<Release>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = Self::key(owner, repo);
        if self.failing.lock().unwrap().contains(&key) {
            return Err(Error::HttpStatus {
                url: format!("https://api.github.test/repos/{}", key),
                status: 502,
            });
        }
        Ok(map.lock().unwrap().get(&key).cloned())
    }
}

#[async_trait]
impl ReleaseSource for FakeReleaseSource {
    async fn fetch_latest_release(&self, owner: &str, repo: &str) -> appkeep::Result<Option<Release>> {
        self.lookup(&self.stable, owner, repo)
    }

    async fn fetch_prerelease(&self, owner: &str, repo: &str) -> appkeep::Result<Option<Release>> {
        self.lookup(&self.prerelease, owner, repo)
    }

    async fn fetch_release_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> appkeep::Result<Option<Release>> {
        let found = self
            .lookup(&self.stable, owner, repo)?
            .filter(|r| r.original_tag_name == tag);
        Ok(found)
    }

    fn rate_limit_remaining(&self) -> Option<u32> {
        *self.remaining.lock().unwrap()
    }
}

/// Serves fixed bodies by URL.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    pub downloads: AtomicUsize,
    pub text_requests: AtomicUsize,
}

#[allow(dead_code)]
impl FakeFetcher {
    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(url.into(), body.into());
    }

    fn body(&self, url: &str) -> appkeep::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn get_text(&self, url: &str) -> appkeep::Result<String> {
        self.text_requests.fetch_add(1, Ordering::SeqCst);
        Ok(String::from_utf8_lossy(&self.body(url)?).to_string())
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn ProgressReporter,
    ) -> appkeep::Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let body = self.body(url)?;
        let task = progress.add_task("download", body.len() as u64);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &body).await?;
        progress.finish_task(task, true, None);
        Ok(body.len() as u64)
    }
}

/// Config store, directories and fakes rooted in one temp dir.
#[allow(dead_code)]
pub struct Workspace {
    pub dir: TempDir,
    pub store: Arc<JsonConfigStore>,
    pub global: GlobalConfig,
    pub source: Arc<FakeReleaseSource>,
    pub fetcher: Arc<FakeFetcher>,
}

#[allow(dead_code)]
impl Workspace {
    pub fn new() -> Self {
        Self::with_global(|_| {})
    }

    pub fn with_global(tweak: impl FnOnce(&mut GlobalConfig)) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(JsonConfigStore::new(dir.path().join("config")));
        let mut global = GlobalConfig {
            directory: DirectoryConfig::under(dir.path()),
            ..GlobalConfig::default()
        };
        tweak(&mut global);
        store.save_global_config(&global).unwrap();

        Self {
            dir,
            store,
            global,
            source: Arc::new(FakeReleaseSource::default()),
            fetcher: Arc::new(FakeFetcher::default()),
        }
    }

    pub fn storage(&self) -> &Path {
        &self.global.directory.storage
    }

    /// Register an app and, when `content` is given, its installed binary.
    pub fn install_app(
        &self,
        name: &str,
        owner: &str,
        repo: &str,
        version: &str,
        content: Option<&[u8]>,
    ) -> AppConfig {
        let mut config = AppConfig {
            source: SourceOverrides {
                owner: Some(owner.to_string()),
                repo: Some(repo.to_string()),
                prerelease: None,
            },
            ..AppConfig::default()
        };
        config.state.version = version.to_string();

        if let Some(content) = content {
            let path = self.storage().join(format!("{}.AppImage", name));
            std::fs::create_dir_all(self.storage()).unwrap();
            std::fs::write(&path, content).unwrap();
            config.state.installed_path = Some(path);
        }

        self.store.save_app_config(name, &config).unwrap();
        config
    }

    pub fn app_config(&self, name: &str) -> AppConfig {
        self.store.load_app_config(name).unwrap().unwrap()
    }

    pub fn manager(&self) -> appkeep::UpdateManager {
        appkeep::UpdateManager::new(self.store.clone(), self.source.clone(), self.fetcher.clone())
            .unwrap()
            .with_arch("x86_64")
    }
}
