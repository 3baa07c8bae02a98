use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const USER_AGENT: &str = concat!("appkeep/", env!("CARGO_PKG_VERSION"));

/// Plain HTTP GET capability. Auth and session lifecycle belong to the implementor.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::network("client", e))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(url, e))?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get_text(&self, url: &str) -> Result<String> {
        tracing::debug!("Fetching {}", url);
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| Error::network(url, e))
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<u64> {
        let filename = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| url.to_string());
        tracing::info!("Downloading {}...", filename);

        let response = self.get(url).await?;
        let total_size = response.content_length().unwrap_or(0);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let task = progress.add_task(&format!("Downloading {}", filename), total_size);
        let part = partial_path(dest);
        let mut file = fs::File::create(&part).await?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&part).await;
                    progress.finish_task(task, false, Some("Download failed"));
                    return Err(Error::network(url, e));
                }
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress.update_task(task, downloaded, None);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&part, dest).await?;

        progress.finish_task(task, true, Some("Download complete"));
        Ok(downloaded)
    }
}
