//! Direct-mode acquisition and the snapshot handed to extraction.

use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use tracing::info;

use crate::browser::LiveDocument;
use crate::document::StaticDocument;
use crate::error::{Result, ScrapeError, Stage};

/// Content available for extraction. Live snapshots borrow the session
/// that rendered them and cannot outlive it.
pub enum PageSnapshot<'s> {
    Static(StaticDocument),
    Live(LiveDocument<'s>),
    Json { value: Value, source_url: String },
}

impl PageSnapshot<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            PageSnapshot::Static(_) => "static document",
            PageSnapshot::Live(_) => "live document",
            PageSnapshot::Json { .. } => "json",
        }
    }
}

/// Single HTTP GET per run.
pub struct DirectFetcher {
    client: reqwest::Client,
}

impl DirectFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::fetch(Stage::Launch, "http client", e))?;
        Ok(Self { client })
    }

    /// Fetch `url`; non-2xx statuses and unparseable JSON bodies fail.
    pub async fn fetch(&self, url: &Url, expect_json: bool) -> Result<PageSnapshot<'static>> {
        let fail = |e: &dyn std::fmt::Display| ScrapeError::fetch(Stage::Fetch, url.as_str(), e);

        info!("🌐 GET {}", url);
        let resp = self
            .client
            .get(url.clone())
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| fail(&e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(fail(&format!("HTTP {}", status)));
        }
        let final_url = resp.url().clone();
        let body = resp.text().await.map_err(|e| fail(&e))?;
        info!("Fetched {} bytes from {}", body.len(), final_url);

        if expect_json {
            let value: Value = serde_json::from_str(&body).map_err(|e| fail(&format!("malformed JSON body: {}", e)))?;
            return Ok(PageSnapshot::Json {
                value,
                source_url: final_url.to_string(),
            });
        }
        Ok(PageSnapshot::Static(StaticDocument::parse(body, final_url)))
    }
}
