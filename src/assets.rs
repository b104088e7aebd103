//! Bounded-parallelism image downloads for newly published events.
//!
//! A failed download never fails the owning record; it only leaves
//! `local_image` unset.

use crate::config::AssetsConfig;
use crate::error::{Result, ScraperError};
use crate::observability::metrics;
use crate::pipeline::backoff::BackoffPolicy;
use crate::types::ProcessedEvent;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub struct AssetFetcher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    backoff: BackoffPolicy,
    assets_dir: PathBuf,
}

impl AssetFetcher {
    pub fn new(config: &AssetsConfig, assets_dir: &str) -> Result<Self> {
        let assets_dir = PathBuf::from(assets_dir);
        std::fs::create_dir_all(&assets_dir).map_err(|e| {
            ScraperError::Setup(format!(
                "Assets directory '{}' is not writable: {}",
                assets_dir.display(),
                e
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            backoff: BackoffPolicy::new(
                config.max_retries,
                config.retry_base_delay_ms,
                config.retry_base_delay_ms.saturating_mul(8),
            ),
            assets_dir,
        })
    }

    /// Download every event's image concurrently, bounded by the permit pool,
    /// and record the local path on success.
    pub async fn fetch_all(&self, events: &mut [ProcessedEvent]) {
        let mut tasks = tokio::task::JoinSet::new();

        for (idx, event) in events.iter().enumerate() {
            if event.image_url.is_empty() {
                continue;
            }
            let client = self.client.clone();
            let semaphore = self.semaphore.clone();
            let backoff = self.backoff.clone();
            let url = event.image_url.clone();
            let id = event.id.clone();
            let dir = self.assets_dir.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match download_with_retry(&client, &backoff, &url, &dir, &id).await {
                    Ok(path) => {
                        metrics::assets::download_success();
                        Some((idx, path))
                    }
                    Err(e) => {
                        metrics::assets::download_failed();
                        warn!(id, error = %e, "Image download failed, keeping record without asset");
                        None
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some((idx, path))) = joined {
                events[idx].local_image = Some(path);
            }
        }
    }
}

async fn download_with_retry(
    client: &reqwest::Client,
    backoff: &BackoffPolicy,
    url: &str,
    dir: &Path,
    id: &str,
) -> Result<String> {
    let mut attempt: u32 = 0;
    let bytes = loop {
        match fetch_bytes(client, url).await {
            Ok(bytes) => break bytes,
            Err(e) => {
                attempt += 1;
                match backoff.next_delay(attempt) {
                    Some(delay) => {
                        debug!(url, attempt, "Retrying image download");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                }
            }
        }
    };

    let file_name = format!("{}.{}", sanitize_id(id), extension_for(url));
    let target = dir.join(&file_name);
    tokio::fs::write(&target, &bytes).await?;
    Ok(target.display().to_string())
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ScraperError::Api {
            message: format!("Image fetch returned HTTP {}", response.status()),
        });
    }
    Ok(response.bytes().await?.to_vec())
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// File extension from the URL path; anything unrecognizable becomes jpg.
fn extension_for(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path()
                .rsplit('.')
                .next()
                .map(str::to_lowercase)
                .filter(|e| e.len() <= 4 && !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()) && !e.contains('/'))
        })
        .unwrap_or_else(|| "jpg".to_string())
}
