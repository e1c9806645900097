//! Stage orchestration: acquire, gate, scroll, extract, normalize, write.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::challenge::{self, GateOutcome, GateSettings};
use crate::config::RunConfig;
use crate::error::{Result, ScrapeError, Stage};
use crate::extractor::{extract_document, extract_json, ExtractionResult};
use crate::fetcher::{DirectFetcher, PageSnapshot};
use crate::normalizer::normalize_all;
use crate::scroller::{scroll_until_stable, ScrollOutcome, ScrollSettings};
use crate::session::Session;
use crate::stealth;

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub path: PathBuf,
    pub counts: Vec<(String, usize)>,
    pub gate: GateOutcome,
    pub scroll: Option<ScrollOutcome>,
}

struct Acquired<'s> {
    snapshot: PageSnapshot<'s>,
    gate: GateOutcome,
    scroll: Option<ScrollOutcome>,
}

/// Run every stage for `config.target` and persist the artifact.
pub async fn run(config: &RunConfig) -> Result<RunSummary> {
    let session = Session::open(config.target.clone(), config.mode, config.budget, &config.browser)?;
    let result = run_in(&session, config).await;
    // The browser, if any, is released here on success and failure alike.
    session.close();
    result
}

async fn run_in(session: &Session, config: &RunConfig) -> Result<RunSummary> {
    let acquired = match session.browser() {
        None => acquire_direct(session, config).await?,
        Some(browser) => acquire_in_browser(session, browser, config).await?,
    };
    let url = session.target.as_str();

    info!("🔎 Extracting {} dataset(s) from {}", config.datasets.len(), acquired.snapshot.kind());
    let raw = match &acquired.snapshot {
        PageSnapshot::Static(doc) => extract_document(doc, &config.datasets)?,
        PageSnapshot::Live(doc) => extract_document(doc, &config.datasets)?,
        PageSnapshot::Json { value, source_url } => extract_json(value, source_url, &config.datasets)?,
    };
    let results: Vec<ExtractionResult> = normalize_all(raw);
    for result in &results {
        if result.is_empty() {
            warn!("Dataset `{}` is empty for {}", result.name, url);
        }
    }

    let path = config.writer.write(url, &results, Utc::now())?;
    Ok(RunSummary {
        path,
        counts: results.iter().map(|r| (r.name.clone(), r.len())).collect(),
        gate: acquired.gate,
        scroll: acquired.scroll,
    })
}

async fn acquire_direct(session: &Session, config: &RunConfig) -> Result<Acquired<'static>> {
    let fetcher = DirectFetcher::new(stealth::random_user_agent(), session.clamp(config.http_timeout))?;
    let snapshot = fetcher.fetch(&session.target, config.json_resource).await?;

    let gate = match &snapshot {
        PageSnapshot::Static(doc) => challenge::inspect_static(doc, session.target.as_str(), &config.gate)?,
        _ => GateOutcome::Clear,
    };
    Ok(Acquired {
        snapshot,
        gate,
        scroll: None,
    })
}

async fn acquire_in_browser<'s>(
    session: &'s Session,
    browser: &'s BrowserSession,
    config: &RunConfig,
) -> Result<Acquired<'s>> {
    let url = session.target.as_str();

    browser
        .navigate(url)
        .await
        .map_err(|e| ScrapeError::fetch(Stage::Fetch, url, format!("{:#}", e)))?;

    let gate_settings = GateSettings {
        wait: session.clamp(config.gate.wait),
        ..config.gate.clone()
    };
    let gate = challenge::pass_gate(browser, url, &gate_settings).await?;

    let scroll_settings = ScrollSettings {
        max_duration: session.clamp(config.scroll.max_duration),
        ..config.scroll.clone()
    };
    let scroll = scroll_until_stable(browser, &scroll_settings)
        .await
        .map_err(|e| ScrapeError::fetch(Stage::Scroll, url, format!("{:#}", e)))?;

    let snapshot = if config.json_resource {
        let value = browser
            .fetch_json(url)
            .map_err(|e| ScrapeError::fetch(Stage::Fetch, url, format!("{:#}", e)))?;
        PageSnapshot::Json {
            value,
            source_url: browser.current_url(),
        }
    } else {
        let doc = browser
            .document()
            .map_err(|e| ScrapeError::fetch(Stage::Extract, url, format!("{:#}", e)))?;
        PageSnapshot::Live(doc)
    };

    Ok(Acquired {
        snapshot,
        gate,
        scroll: Some(scroll),
    })
}
