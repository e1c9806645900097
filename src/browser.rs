//! Headless Chrome session: launch, navigation, and the live-page
//! capabilities used by the gate, the scroller and the extractor.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::challenge::ChallengeProbe;
use crate::document::{background_url_from_style, parse_selector, QueryableDocument};
use crate::poll::{poll_until, Backoff};
use crate::scroller::ScrollSurface;
use crate::stealth;

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// Picked from the stealth pool when unset.
    pub user_agent: Option<String>,
    pub timezone: String,
    pub locale: String,
    pub navigation_timeout: Duration,
    /// Resource count must hold still this long to call the network idle.
    pub idle_quiet: Duration,
    pub idle_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            user_agent: None,
            timezone: "UTC".to_string(),
            locale: "en-US".to_string(),
            navigation_timeout: Duration::from_secs(30),
            idle_quiet: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns the Chrome process. Dropping the session closes the browser.
pub struct BrowserSession {
    // Field order matters: the tab goes before the browser that owns it.
    tab: Arc<Tab>,
    _browser: Browser,
    options: BrowserOptions,
}

/// Load signals sampled while waiting for the network to settle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadState {
    /// `document.readyState`
    pub ready: String,
    /// Number of resource-timing entries so far.
    pub resources: u64,
}

pub trait LoadProbe {
    fn load_state(&self) -> Result<LoadState>;
}

/// Wait until the page reports `complete` and its resource count has held
/// still for `quiet`. Returns false when `timeout` elapses first.
pub async fn wait_for_network_idle<P: LoadProbe + ?Sized>(probe: &P, quiet: Duration, timeout: Duration) -> bool {
    let interval = (quiet / 5).clamp(Duration::from_millis(1), Duration::from_millis(100));
    let backoff = Backoff::fixed(interval, timeout);
    let mut last_count = None;
    let mut last_change = Instant::now();

    let outcome = poll_until(&backoff, || {
        let state = match probe.load_state() {
            Ok(state) => state,
            Err(e) => {
                debug!("load state probe failed: {}", e);
                return false;
            }
        };
        if last_count != Some(state.resources) {
            last_count = Some(state.resources);
            last_change = Instant::now();
        }
        state.ready == "complete" && last_change.elapsed() >= quiet
    })
    .await;
    outcome.is_satisfied()
}

#[derive(Deserialize)]
struct InPageResponse {
    ok: bool,
    status: u16,
    body: String,
}

impl BrowserSession {
    pub fn launch(options: BrowserOptions) -> Result<Self> {
        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| stealth::random_user_agent().to_string());
        let args = stealth::launch_args(&user_agent, options.headless);

        info!(
            "🚀 Launching Chrome ({}, UA: {})",
            if options.headless { "headless" } else { "headful" },
            user_agent
        );
        let browser = Browser::new(LaunchOptions {
            // Headless mode is selected through --headless=new in `args`.
            headless: false,
            window_size: Some((1920, 1080)),
            args: args.iter().map(|a| OsStr::new(a.as_str())).collect(),
            path: options.chrome_path.clone(),
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        })
        .context("failed to launch Chrome")?;

        let tab = browser.new_tab()?;
        tab.set_default_timeout(options.navigation_timeout);
        stealth::harden_tab(&tab, &options.timezone, &options.locale)?;

        Ok(Self {
            tab,
            _browser: browser,
            options,
        })
    }

    pub fn current_url(&self) -> String {
        self.tab.get_url()
    }

    /// Navigate and wait for the load event and a quiet network.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        info!("Navigating to: {}", url);
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;

        if !wait_for_network_idle(self, self.options.idle_quiet, self.options.idle_timeout).await {
            warn!(
                "⚠️ Network still busy after {:?} on {}, continuing",
                self.options.idle_timeout, url
            );
        }
        Ok(())
    }

    /// Evaluate an expression that returns a JSON string and decode it.
    pub fn evaluate_json<T: serde::de::DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let remote = self.tab.evaluate(expression, true)?;
        let raw = remote
            .value
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("expression did not return a string"))?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Fetch `url` from inside the page so the request carries the cookies
    /// and clearance the challenge gate earned.
    pub fn fetch_json(&self, url: &str) -> Result<Value> {
        let script = format!(
            r#"(async () => {{
                const r = await fetch({url}, {{ credentials: 'include', headers: {{ 'Accept': 'application/json' }} }});
                const body = await r.text();
                return JSON.stringify({{ ok: r.ok, status: r.status, body }});
            }})()"#,
            url = serde_json::to_string(url)?
        );
        let resp: InPageResponse = self.evaluate_json(&script)?;
        if !resp.ok {
            return Err(anyhow!("HTTP {}", resp.status));
        }
        info!("Fetched {} bytes of JSON in-page", resp.body.len());
        serde_json::from_str(&resp.body).map_err(|e| anyhow!("malformed JSON body: {}", e))
    }

    /// Snapshot of the current page for extraction.
    pub fn document(&self) -> Result<LiveDocument<'_>> {
        let base_url = Url::parse(&self.current_url())?;
        Ok(LiveDocument { tab: &self.tab, base_url })
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        info!("🧹 Browser released");
    }
}

impl LoadProbe for BrowserSession {
    fn load_state(&self) -> Result<LoadState> {
        self.evaluate_json(
            "JSON.stringify({ ready: document.readyState, resources: performance.getEntriesByType('resource').length })",
        )
    }
}

impl ChallengeProbe for BrowserSession {
    fn has_element(&self, selector: &str) -> Result<bool> {
        let script = format!("document.querySelector({}) !== null", serde_json::to_string(selector)?);
        let remote = self.tab.evaluate(&script, false)?;
        Ok(remote.value.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }
}

impl ScrollSurface for BrowserSession {
    fn content_height(&self) -> Result<u64> {
        let remote = self.tab.evaluate(
            "Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement.scrollHeight)",
            false,
        )?;
        remote
            .value
            .as_ref()
            .and_then(Value::as_f64)
            .map(|h| h as u64)
            .ok_or_else(|| anyhow!("scrollHeight unavailable"))
    }

    fn scroll_to_bottom(&self) -> Result<()> {
        self.tab
            .evaluate("window.scrollTo(0, document.documentElement.scrollHeight);", false)?;
        Ok(())
    }
}

/// Live DOM of the session's tab.
pub struct LiveDocument<'s> {
    tab: &'s Tab,
    base_url: Url,
}

fn attribute_of(node: &Element<'_>, name: &str) -> Option<String> {
    // Flat [name, value, name, value, ...] list.
    let attrs = node.get_attributes().ok()??;
    attrs
        .chunks(2)
        .find(|pair| pair.first().map(String::as_str) == Some(name))
        .and_then(|pair| pair.get(1).cloned())
}

impl<'s> QueryableDocument for LiveDocument<'s> {
    type Node<'a> = Element<'a> where Self: 'a;

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn markup(&self) -> Result<String> {
        self.tab.get_content()
    }

    fn select<'a>(&'a self, selector: &str) -> Result<Vec<Element<'a>>> {
        parse_selector(selector)?;
        match self.tab.find_elements(selector) {
            Ok(nodes) => Ok(nodes),
            Err(e) => {
                debug!("no live match for `{}`: {}", selector, e);
                Ok(Vec::new())
            }
        }
    }

    fn select_in<'a>(&'a self, scope: &Element<'a>, selector: &str) -> Result<Option<Element<'a>>> {
        parse_selector(selector)?;
        Ok(scope.find_element(selector).ok())
    }

    fn attr(&self, node: &Element<'_>, name: &str) -> Option<String> {
        attribute_of(node, name)
    }

    fn text(&self, node: &Element<'_>) -> Option<String> {
        let text = node.get_inner_text().ok()?;
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn background_image(&self, node: &Element<'_>) -> Option<String> {
        let remote = node
            .call_js_fn("function() { return getComputedStyle(this).backgroundImage; }", vec![], false)
            .ok()?;
        let computed = remote.value?.as_str()?.to_string();
        background_url_from_style(&format!("background-image: {}", computed))
    }

    // One round trip over computed styles instead of one per element.
    fn background_images(&self) -> Result<Vec<String>> {
        let remote = self.tab.evaluate(
            r#"JSON.stringify(Array.from(document.querySelectorAll('*'))
                .map(el => getComputedStyle(el).backgroundImage)
                .filter(bg => bg && bg !== 'none'))"#,
            false,
        )?;
        let raw = remote
            .value
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("computed styles unavailable"))?;
        let computed: Vec<String> = serde_json::from_str(raw)?;
        Ok(computed
            .iter()
            .filter_map(|bg| background_url_from_style(&format!("background-image: {}", bg)))
            .collect())
    }
}
