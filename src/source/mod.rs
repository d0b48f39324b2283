pub mod amfi;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::SourceConfig;
use crate::models::{MfApiPayload, RawNavRecord, SchemeMetaPayload};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Full history + metadata for one scheme, records newest-first as served.
#[derive(Debug, Default)]
pub struct SchemeHistory {
    pub meta: SchemeMetaPayload,
    pub records: Vec<RawNavRecord>,
}

/// Swappable NAV time-series source abstraction.
#[async_trait]
pub trait NavSource: Send + Sync {
    async fn fetch_history(&self, scheme_code: &str) -> Result<SchemeHistory>;
}

// ── mfapi.in client ───────────────────────────────────────────────────────────

pub struct MfApiClient {
    inner: reqwest::Client,
    base_url: String,
    request_delay_ms: u64,
    jitter_ms: u64,
    amfi_url: String,
}

impl MfApiClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
            amfi_url: config.amfi_url.clone(),
        })
    }

    fn scheme_url(&self, scheme_code: &str) -> String {
        format!("{}/mf/{}", self.base_url, scheme_code)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        sleep(Duration::from_millis(self.request_delay_ms + jitter)).await;
    }

    /// Fetches the AMFI full-scheme text feed.
    pub async fn fetch_amfi_feed(&self) -> Result<String> {
        self.polite_delay().await;
        debug!("GET {}", self.amfi_url);

        let resp = self
            .inner
            .get(&self.amfi_url)
            .send()
            .await
            .context("AMFI feed request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("AMFI feed returned HTTP {}", status);
        }

        resp.text().await.context("Failed to read AMFI feed body")
    }
}

#[async_trait]
impl NavSource for MfApiClient {
    async fn fetch_history(&self, scheme_code: &str) -> Result<SchemeHistory> {
        self.polite_delay().await;

        let url = self.scheme_url(scheme_code);
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request failed for scheme {}", scheme_code))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} for scheme {}", status, scheme_code);
        }

        let payload: MfApiPayload = resp
            .json()
            .await
            .with_context(|| format!("Malformed payload for scheme {}", scheme_code))?;

        Ok(SchemeHistory {
            meta: payload.meta,
            records: payload.data,
        })
    }
}
