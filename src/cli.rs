use clap::{Parser, Subcommand};

pub fn get_version() -> &'static str {
    const BASE_VERSION: &str = env!("CARGO_PKG_VERSION");

    // If there's a git tag at HEAD, use just the tag (release build)
    if let Some(tag) = option_env!("APPKEEP_GIT_TAG") {
        return tag;
    }

    // Not on a tag - include commit hash and branch (dev build)
    let commit = option_env!("APPKEEP_GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("APPKEEP_GIT_BRANCH").unwrap_or("unknown");

    // Leaked once at startup
    let version = format!("v{}-{} ({})", BASE_VERSION, commit, branch);
    Box::leak(version.into_boxed_str())
}

#[derive(Parser)]
#[command(name = "appkeep")]
#[command(about = "An AppImage update manager for GitHub Releases")]
#[command(version = get_version(), propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check installed apps for newer releases
    Check {
        /// Apps to check (defaults to every installed app)
        apps: Vec<String>,
        /// Ignore cached release data
        #[arg(long)]
        refresh: bool,
    },

    /// Download, verify and install newer releases
    Update {
        /// Apps to update
        apps: Vec<String>,
        /// Update every installed app
        #[arg(long, conflicts_with = "apps")]
        all: bool,
        /// Reinstall even when already up to date, bypassing the release cache
        #[arg(short, long)]
        force: bool,
    },

    /// Manage the release metadata cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage backups of previous versions
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Manage appkeep's configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the current version
    Version,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Remove cached releases, optionally only for one owner or repository
    Clear {
        /// Repository owner
        owner: Option<String>,
        /// Repository name (requires owner)
        #[arg(requires = "owner")]
        repo: Option<String>,
    },
    /// Remove entries older than the given age
    Cleanup {
        #[arg(long, default_value_t = 7)]
        max_age_days: u32,
    },
    /// Show cache statistics
    Stats,
}

#[derive(Subcommand)]
pub enum BackupAction {
    /// List backups (for one app, or every app with backups)
    List { app: Option<String> },
    /// Restore a backup into the storage directory
    Restore {
        app: String,
        /// Version to restore (defaults to the newest backup)
        #[arg(long)]
        version: Option<String>,
    },
    /// Apply the retention limit
    Cleanup { app: Option<String> },
    /// Recompute the checksum of a stored backup
    Verify { app: String, version: String },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a configuration setting
    Get {
        /// Key to get (if omitted, shows all settings)
        key: Option<String>,
    },
    /// Set a configuration setting
    Set {
        /// Key (e.g., 'max-backup')
        key: String,
        /// New value
        value: String,
    },
    /// Show full configuration
    Show {
        /// Output format (json, yaml, plain)
        #[arg(long, default_value = "json")]
        format: String,
    },
}
