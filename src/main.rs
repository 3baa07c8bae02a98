mod cli;

use anyhow::{anyhow, bail, Context, Result};
use appkeep::config::normalize_key;
use appkeep::{
    BackupService, ConfigStore, GitHubClient, GlobalConfig, HttpFetcher, JsonConfigStore,
    NoopProgress, ProgressReporter, TerminalProgress, UpdateInfo, UpdateManager,
};
use clap::Parser;
use cli::{BackupAction, CacheAction, Cli, Commands, ConfigAction};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli)?;

    let store = Arc::new(JsonConfigStore::from_env().context("Failed to locate config directory")?);

    match cli.command {
        Commands::Version => {
            println!("appkeep {}", cli::get_version());
        }

        Commands::Check { apps, refresh } => {
            let apps = if apps.is_empty() {
                store.list_installed_apps()?
            } else {
                apps
            };
            if apps.is_empty() {
                print_check_results(&[]);
                return Ok(());
            }

            let (manager, github) = build_manager(&store, cli.quiet)?;
            prime_rate_limit(&github).await;
            let infos = manager.check_updates(Some(apps.as_slice()), refresh).await?;
            print_check_results(&infos);
        }

        Commands::Update { apps, all, force } => {
            let apps = if all || apps.is_empty() {
                store.list_installed_apps()?
            } else {
                apps
            };
            if apps.is_empty() {
                println!("No apps installed.");
                return Ok(());
            }

            let (manager, github) = build_manager(&store, cli.quiet)?;
            prime_rate_limit(&github).await;

            let outcome = if force {
                manager.update_multiple_apps(&apps, true).await?
            } else {
                let infos = manager.check_updates(Some(apps.as_slice()), false).await?;
                manager.update_from_check(infos, false).await?
            };

            println!("--- Update Summary ---");
            for (app, ok) in &outcome.results {
                match outcome.errors.get(app) {
                    Some(reason) => println!("  ✗ {}: {}", app, reason),
                    None if *ok => println!("  ✓ {}", app),
                    None => println!("  ✗ {}", app),
                }
            }
            println!(
                "{} succeeded, {} failed",
                outcome.succeeded(),
                outcome.failed()
            );
            if outcome.failed() > 0 {
                std::process::exit(1);
            }
        }

        Commands::Cache { action } => {
            let global = store.load_global_config()?;
            let cache = appkeep::ReleaseCache::new(&global.directory.cache, global.cache_ttl_hours);
            match action {
                CacheAction::Clear { owner, repo } => {
                    let removed = cache.clear_cache(owner.as_deref(), repo.as_deref())?;
                    println!("Removed {} cache entries", removed);
                }
                CacheAction::Cleanup { max_age_days } => {
                    let removed = cache.cleanup_expired(max_age_days)?;
                    println!("Removed {} expired cache entries", removed);
                }
                CacheAction::Stats => {
                    let stats = cache.get_cache_stats();
                    println!("--- Release Cache ---");
                    println!("  Location:  {}", cache.dir().display());
                    println!("  Entries:   {}", stats.total_entries);
                    println!("  Fresh:     {}", stats.fresh_entries);
                    println!("  Expired:   {}", stats.expired_entries);
                    println!("  Corrupted: {}", stats.corrupted_entries);
                }
            }
        }

        Commands::Backup { action } => {
            let global = store.load_global_config()?;
            let backups = BackupService::new(
                &global.directory.backup,
                store.clone(),
                global.max_backup,
            );
            run_backup_action(&backups, &global, action)?;
        }

        Commands::Config { action } => run_config_action(&store, action)?,
    }

    Ok(())
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn build_manager(
    store: &Arc<JsonConfigStore>,
    quiet: bool,
) -> Result<(Arc<UpdateManager>, Arc<GitHubClient>)> {
    let github = Arc::new(GitHubClient::new()?);
    let fetcher = Arc::new(HttpFetcher::new()?);
    let progress: Arc<dyn ProgressReporter> = if quiet {
        Arc::new(NoopProgress)
    } else {
        Arc::new(TerminalProgress::new())
    };

    let manager = UpdateManager::new(store.clone(), github.clone(), fetcher)
        .context("Failed to initialize update manager")?
        .with_progress(progress);
    Ok((Arc::new(manager), github))
}

async fn prime_rate_limit(github: &GitHubClient) {
    match github.fetch_rate_limit().await {
        Ok(remaining) => tracing::info!("GitHub API requests remaining: {}", remaining),
        Err(e) => tracing::warn!("Could not query GitHub rate limit: {}", e),
    }
}

fn print_check_results(infos: &[UpdateInfo]) {
    println!("--- Update Check ---");
    if infos.is_empty() {
        println!("  No apps installed yet.");
        return;
    }

    for info in infos {
        if let Some(reason) = &info.error_reason {
            println!("  ✗ {}: {}", info.app_name, reason);
        } else if info.has_update {
            let marker = if info.prerelease { " (prerelease)" } else { "" };
            println!(
                "  ↑ {}: {} -> {}{}",
                info.app_name,
                display_version(&info.current_version),
                info.latest_version,
                marker
            );
        } else {
            println!("  ✓ {}: {} (up to date)", info.app_name, info.current_version);
        }
    }
}

fn display_version(version: &str) -> &str {
    if version.is_empty() {
        "not installed"
    } else {
        version
    }
}

fn run_backup_action(
    backups: &BackupService,
    global: &GlobalConfig,
    action: BackupAction,
) -> Result<()> {
    match action {
        BackupAction::List { app } => {
            let apps = match app {
                Some(app) => vec![app],
                None => backups.list_apps_with_backups()?,
            };
            if apps.is_empty() {
                println!("No backups found.");
            }
            for app in apps {
                println!("{}:", app);
                for backup in backups.get_backup_info(&app)? {
                    println!(
                        "  - {} ({} bytes, {})",
                        backup.version,
                        backup.size,
                        backup.created.format("%Y-%m-%d %H:%M:%S")
                    );
                    println!("    Path: {}", backup.path.display());
                }
            }
        }
        BackupAction::Restore { app, version } => {
            let storage = &global.directory.storage;
            let restored = match version {
                Some(version) => backups.restore_specific_version(&app, &version, storage)?,
                None => backups.restore_latest_backup(&app, storage)?,
            };
            println!("Restored {} to {}", app, restored.display());
        }
        BackupAction::Cleanup { app } => {
            let removed = backups.cleanup_old_backups(app.as_deref())?;
            println!("Removed {} old backups", removed);
        }
        BackupAction::Verify { app, version } => {
            if backups.verify_backup_integrity(&app, &version)? {
                println!("Backup {} {} is intact", app, version);
            } else {
                bail!("Backup {} {} failed integrity check", app, version);
            }
        }
    }
    Ok(())
}

const SETTINGS_KEYS: [&str; 3] = ["max_concurrent_downloads", "max_backup", "cache_ttl_hours"];

fn setting_value(config: &GlobalConfig, key: &str) -> Option<String> {
    match key {
        "max_concurrent_downloads" => Some(config.max_concurrent_downloads.to_string()),
        "max_backup" => Some(config.max_backup.to_string()),
        "cache_ttl_hours" => Some(config.cache_ttl_hours.to_string()),
        _ => None,
    }
}

fn run_config_action(store: &JsonConfigStore, action: ConfigAction) -> Result<()> {
    let mut config = store.load_global_config()?;

    match action {
        ConfigAction::Get { key } => {
            if let Some(key) = key {
                let key = normalize_key(&key);
                let value = setting_value(&config, &key)
                    .ok_or_else(|| anyhow!("Setting '{}' not found", key))?;
                println!("{}", value);
            } else {
                println!("--- appkeep Settings ---");
                for key in SETTINGS_KEYS {
                    if let Some(value) = setting_value(&config, key) {
                        println!("  {}: {}", key, value);
                    }
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let key = normalize_key(&key);
            let invalid = || anyhow!("Invalid value for '{}': {}", key, value);
            match key.as_str() {
                "max_concurrent_downloads" => {
                    let parsed: usize = value.parse().map_err(|_| invalid())?;
                    if parsed == 0 {
                        return Err(invalid());
                    }
                    config.max_concurrent_downloads = parsed;
                }
                "max_backup" => config.max_backup = value.parse().map_err(|_| invalid())?,
                "cache_ttl_hours" => config.cache_ttl_hours = value.parse().map_err(|_| invalid())?,
                _ => bail!(
                    "'{}' is not a valid configuration setting. Valid settings: {}",
                    key,
                    SETTINGS_KEYS.join(", ")
                ),
            }
            store.save_global_config(&config)?;
            tracing::info!("Setting '{}' updated to '{}'", key, value);
        }
        ConfigAction::Show { format } => match format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(&config)?),
            "yaml" => print!("{}", serde_yaml::to_string(&config)?),
            "plain" => {
                for key in SETTINGS_KEYS {
                    if let Some(value) = setting_value(&config, key) {
                        println!("{}={}", key, value);
                    }
                }
                println!("storage_dir={}", config.directory.storage.display());
                println!("backup_dir={}", config.directory.backup.display());
                println!("cache_dir={}", config.directory.cache.display());
            }
            other => bail!("Unknown format '{}'. Use json, yaml or plain.", other),
        },
    }

    Ok(())
}
