//! One scraping run against one target.

use std::time::{Duration, Instant};

use reqwest::Url;
use tracing::info;

use crate::browser::{BrowserOptions, BrowserSession};
use crate::error::{Result, ScrapeError, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Plain HTTP GET, no script execution.
    Direct,
    /// Real browser with stealth hardening.
    Browser,
}

impl AcquisitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Direct => "direct",
            AcquisitionMode::Browser => "browser",
        }
    }
}

/// Holds the browser (if any) for the whole run and enforces the overall
/// time budget. The browser is released when the session is dropped,
/// whichever way the run ends.
pub struct Session {
    pub target: Url,
    pub mode: AcquisitionMode,
    budget: Duration,
    started: Instant,
    browser: Option<BrowserSession>,
}

impl Session {
    pub fn open(target: Url, mode: AcquisitionMode, budget: Duration, browser: &BrowserOptions) -> Result<Self> {
        let browser = match mode {
            AcquisitionMode::Direct => None,
            AcquisitionMode::Browser => Some(
                BrowserSession::launch(browser.clone())
                    .map_err(|e| ScrapeError::fetch(Stage::Launch, target.as_str(), format!("{:#}", e)))?,
            ),
        };
        info!("Session opened for {} ({} mode, budget {:?})", target, mode.as_str(), budget);
        Ok(Self {
            target,
            mode,
            budget,
            started: Instant::now(),
            browser,
        })
    }

    pub fn browser(&self) -> Option<&BrowserSession> {
        self.browser.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Cap a stage window at what is left of the budget.
    pub fn clamp(&self, window: Duration) -> Duration {
        window.min(self.remaining())
    }

    pub fn close(self) {
        info!("Session for {} closed after {:?}", self.target, self.elapsed());
    }
}
