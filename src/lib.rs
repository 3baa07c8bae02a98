//! Update, verification and caching core for AppImages published on GitHub Releases.
//!
//! The [`update::UpdateManager`] drives everything: it checks releases (through
//! the [`cache::ReleaseCache`]), downloads the matching AppImage, verifies it with
//! the [`verification`] subsystem, keeps a versioned copy of the previous binary
//! through [`backup::BackupService`] and installs the new one atomically.

pub mod backup;
pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub(crate) mod fs_util;
pub mod github;
pub mod hooks;
pub mod platform;
pub mod progress;
pub mod types;
pub mod update;
pub mod verification;

pub use backup::{BackupInfo, BackupService};
pub use cache::{CacheStats, ReleaseCache};
pub use config::{
    AppConfig, CatalogEntry, ConfigStore, EffectiveAppConfig, GlobalConfig, JsonConfigStore,
    VerificationConfig,
};
pub use download::{Fetcher, HttpFetcher};
pub use error::{Error, Result};
pub use github::{GitHubClient, ReleaseSource};
pub use hooks::{InstallHooks, NoopHooks};
pub use progress::{NoopProgress, ProgressReporter, TerminalProgress};
pub use types::{Asset, Channel, Release, UpdateInfo};
pub use update::{BatchOutcome, UpdateManager, UpdateOutcome};
pub use verification::{VerificationContext, VerificationResult, VerificationService};
