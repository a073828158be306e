// src/fetch/mod.rs

use async_trait::async_trait;
use reqwest::Client;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs, time::sleep};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::MoodleConfig;
use crate::error::FetchError;

/// Places the current plan document on disk.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Download the document to `dest` and return the path written.
    async fn fetch(&self, dest: &Path) -> Result<PathBuf, FetchError>;
}

/// Logs in to moodle with a cookie session and downloads the plan PDF.
pub struct MoodleSource {
    client: Client,
    login_url: Url,
    document_url: Url,
    user: String,
    password: String,
    max_retries: u32,
    initial_backoff_ms: u64,
}

impl MoodleSource {
    pub fn new(cfg: &MoodleConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            login_url: cfg.login_url.clone(),
            document_url: cfg.document_url.clone(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            max_retries: cfg.retries,
            initial_backoff_ms: cfg.backoff_ms,
        })
    }

    async fn login(&self) -> Result<(), FetchError> {
        debug!(url = %self.login_url, "logging in");
        let resp = self
            .client
            .post(self.login_url.clone())
            .form(&[
                ("ajax", "true"),
                ("username", self.user.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            error!(%status, "moodle login failed");
            return Err(FetchError::Login {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn get_bytes_core(&self) -> Result<Vec<u8>, FetchError> {
        let url = &self.document_url;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Download {
                url: url.to_string(),
                reason: format!("status {}", status),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| FetchError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn get_bytes_with_retry(&self) -> Result<Vec<u8>, FetchError> {
        let mut attempts = 0;
        loop {
            match self.get_bytes_core().await {
                Ok(b) => return Ok(b),
                Err(e) if attempts < self.max_retries => {
                    attempts += 1;
                    let backoff = backoff_ms(self.initial_backoff_ms, attempts);
                    warn!(url = %self.document_url, attempt = attempts, delay_ms = backoff, error = %e, "Retrying");
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    error!(url = %self.document_url, error = %e, "Exhausted retries");
                    return Err(e);
                }
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based): doubles each time and
/// saturates instead of overflowing.
fn backoff_ms(initial_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    initial_ms.saturating_mul(factor)
}

#[async_trait]
impl DocumentSource for MoodleSource {
    #[instrument(level = "info", skip(self, dest), fields(dest = %dest.display()))]
    async fn fetch(&self, dest: &Path) -> Result<PathBuf, FetchError> {
        self.login().await?;
        let bytes = self.get_bytes_with_retry().await?;

        let io_err = |source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        fs::write(dest, &bytes).await.map_err(io_err)?;

        info!(bytes = bytes.len(), "document downloaded");
        Ok(dest.to_path_buf())
    }
}
