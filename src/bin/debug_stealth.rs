use std::time::Duration;

use anyhow::Result;
use page_scraper::browser::{BrowserOptions, BrowserSession};
use serde::Deserialize;
use tokio::time::sleep;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fingerprint {
    webdriver: Option<bool>,
    user_agent: String,
    timezone: String,
    languages: Vec<String>,
    plugins: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://bot.sannysoft.com".to_string());
    let headful = std::env::var("SCRAPER_HEADFUL").map(|v| v == "true" || v == "1").unwrap_or(false);

    println!("🕵️ Starting Stealth Debugger against {}", url);
    let session = BrowserSession::launch(BrowserOptions {
        headless: !headful,
        chrome_path: std::env::var_os("CHROME_PATH").map(Into::into),
        ..BrowserOptions::default()
    })?;

    session.navigate(&url).await?;
    sleep(Duration::from_secs(3)).await;

    let fp: Fingerprint = session.evaluate_json(
        r#"JSON.stringify({
            webdriver: navigator.webdriver === undefined ? null : navigator.webdriver,
            userAgent: navigator.userAgent,
            timezone: Intl.DateTimeFormat().resolvedOptions().timeZone,
            languages: Array.from(navigator.languages || []),
            plugins: navigator.plugins.length
        })"#,
    )?;

    println!("navigator.webdriver: {:?}", fp.webdriver);
    println!("User agent:          {}", fp.user_agent);
    println!("Timezone:            {}", fp.timezone);
    println!("Languages:           {}", fp.languages.join(", "));
    println!("Plugins:             {}", fp.plugins);
    Ok(())
}
