//! Error types shared by the update core.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "Verification failed for {app_name} ({}): {}",
        file_path.display(),
        failed_methods.join(", ")
    )]
    Verification {
        app_name: String,
        file_path: PathBuf,
        failed_methods: Vec<String>,
    },

    #[error("GitHub rate limit too low: {remaining} requests remaining, {required} required")]
    RateLimit { remaining: u32, required: u32 },

    #[error("No releases found for {owner}/{repo}")]
    ReleaseNotFound { owner: String, repo: String },

    #[error("No AppImage asset for this platform in {owner}/{repo} {tag}")]
    AssetNotFound {
        owner: String,
        repo: String,
        tag: String,
    },

    #[error("Configuration error for {app_name}: {message}")]
    Config { app_name: String, message: String },

    #[error("App '{0}' is not installed")]
    AppNotInstalled(String),

    #[error("Backup error for {app_name}: {message}")]
    Backup { app_name: String, message: String },

    #[error("Unsupported hash algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("Request to {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(app_name: &str, message: impl Into<String>) -> Self {
        Error::Config {
            app_name: app_name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn backup(app_name: &str, message: impl Into<String>) -> Self {
        Error::Backup {
            app_name: app_name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn network(url: &str, err: impl std::fmt::Display) -> Self {
        Error::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
