//! Command-line surface and run configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use reqwest::Url;
use tracing::info;

use crate::browser::BrowserOptions;
use crate::challenge::{ChallengePolicy, GateSettings};
use crate::error::{Result, ScrapeError};
use crate::extractor::DatasetRequest;
use crate::records::RecordSchema;
use crate::scroller::ScrollSettings;
use crate::session::AcquisitionMode;
use crate::writer::ResultWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Direct,
    Browser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetArg {
    Links,
    Images,
    Emails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordsArg {
    Brokers,
    Games,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Continue,
    Manual,
    Abort,
}

/// Bundled defaults for known targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// Links, images and emails of an ordinary page over plain HTTP.
    Site,
    /// Broker directory JSON endpoint behind a challenge.
    Brokers,
    /// Game release cards on an infinite-scroll page.
    Games,
}

#[derive(Debug, Parser)]
#[command(name = "page-scraper", version, about = "Fetch one page, pass its challenge, scroll it out and save what it holds as JSON")]
pub struct Cli {
    /// Page or JSON resource to scrape (http/https).
    pub url: String,

    #[arg(long, value_enum, default_value = "site")]
    pub preset: Preset,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Comma-separated list of generic datasets.
    #[arg(long, value_enum, value_delimiter = ',')]
    pub datasets: Option<Vec<DatasetArg>>,

    /// Structured records to extract.
    #[arg(long, value_enum)]
    pub records: Option<RecordsArg>,

    /// The target is a JSON API resource rather than an HTML page.
    #[arg(long)]
    pub json: bool,

    #[arg(long, env = "SCRAPER_OUTPUT_DIR")]
    pub out: Option<PathBuf>,

    /// Fixed base file name instead of the sanitized URL.
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long, value_enum, env = "SCRAPER_CHALLENGE_POLICY", default_value = "continue")]
    pub challenge_policy: PolicyArg,

    /// Automatic challenge wait, in seconds.
    #[arg(long, default_value_t = 60)]
    pub challenge_timeout: u64,

    /// Manual resolution window in seconds; waits until Ctrl-C when unset.
    #[arg(long)]
    pub manual_timeout: Option<u64>,

    /// Selector that appears once a required form submission is done.
    #[arg(long)]
    pub submission_marker: Option<String>,

    /// Quiet interval after each scroll, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub scroll_interval: u64,

    #[arg(long, default_value_t = 50)]
    pub scroll_max_iterations: u32,

    /// Overall run budget in seconds.
    #[arg(long, default_value_t = 300)]
    pub budget: u64,

    #[arg(long, env = "SCRAPER_HEADFUL")]
    pub headful: bool,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: Url,
    pub mode: AcquisitionMode,
    pub json_resource: bool,
    pub datasets: Vec<DatasetRequest>,
    pub gate: GateSettings,
    pub scroll: ScrollSettings,
    pub browser: BrowserOptions,
    pub http_timeout: Duration,
    pub budget: Duration,
    pub writer: ResultWriter,
}

struct PresetDefaults {
    mode: AcquisitionMode,
    datasets: Vec<DatasetArg>,
    records: Option<RecordsArg>,
    json: bool,
    folder: PathBuf,
    name: Option<&'static str>,
}

impl Preset {
    fn defaults(self) -> PresetDefaults {
        match self {
            Preset::Site => PresetDefaults {
                mode: AcquisitionMode::Direct,
                datasets: vec![DatasetArg::Links, DatasetArg::Images, DatasetArg::Emails],
                records: None,
                json: false,
                folder: PathBuf::from("."),
                name: None,
            },
            Preset::Brokers => PresetDefaults {
                mode: AcquisitionMode::Browser,
                datasets: Vec::new(),
                records: Some(RecordsArg::Brokers),
                json: true,
                folder: PathBuf::from("brokers"),
                name: Some("ibba-brokers"),
            },
            Preset::Games => PresetDefaults {
                mode: AcquisitionMode::Browser,
                datasets: Vec::new(),
                records: Some(RecordsArg::Games),
                json: false,
                folder: PathBuf::from("."),
                name: Some("upcoming_games"),
            },
        }
    }
}

impl RecordsArg {
    fn request(self) -> DatasetRequest {
        match self {
            RecordsArg::Brokers => DatasetRequest::Records {
                name: "brokers".to_string(),
                schema: RecordSchema::brokers(),
            },
            RecordsArg::Games => DatasetRequest::Records {
                name: "games".to_string(),
                schema: RecordSchema::games(),
            },
        }
    }
}

/// Accept only absolute http(s) URLs.
pub fn parse_target(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ScrapeError::Input("a target URL is required".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| ScrapeError::Input(format!("invalid URL `{}`: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        scheme => Err(ScrapeError::Input(format!(
            "unsupported URL `{}` (scheme `{}`, expected http or https)",
            raw, scheme
        ))),
    }
}

impl Cli {
    /// Merge preset defaults with explicit flags and validate the result.
    pub fn into_config(self) -> Result<RunConfig> {
        let target = parse_target(&self.url)?;
        let preset = self.preset.defaults();

        let mode = match self.mode {
            Some(ModeArg::Direct) => AcquisitionMode::Direct,
            Some(ModeArg::Browser) => AcquisitionMode::Browser,
            None => preset.mode,
        };
        let json_resource = self.json || preset.json;

        let mut requested = self.datasets.unwrap_or(preset.datasets);
        let mut seen = Vec::with_capacity(requested.len());
        requested.retain(|d| {
            if seen.contains(d) {
                false
            } else {
                seen.push(*d);
                true
            }
        });

        let mut datasets: Vec<DatasetRequest> = requested
            .into_iter()
            .map(|d| match d {
                DatasetArg::Links => DatasetRequest::Links,
                DatasetArg::Images => DatasetRequest::Images,
                DatasetArg::Emails => DatasetRequest::Emails,
            })
            .collect();
        if let Some(records) = self.records.or(preset.records) {
            datasets.push(records.request());
        }
        validate_datasets(&datasets, json_resource)?;

        let policy = match self.challenge_policy {
            PolicyArg::Continue => ChallengePolicy::Continue,
            PolicyArg::Abort => ChallengePolicy::Abort,
            PolicyArg::Manual => ChallengePolicy::Manual {
                timeout: self.manual_timeout.map(Duration::from_secs),
            },
        };
        if matches!(policy, ChallengePolicy::Manual { .. }) && mode == AcquisitionMode::Direct {
            return Err(ScrapeError::Input(
                "the manual challenge policy needs a visible browser (--mode browser)".to_string(),
            ));
        }
        if self.submission_marker.is_some() && mode == AcquisitionMode::Direct {
            return Err(ScrapeError::Input(
                "--submission-marker needs a live page to watch (--mode browser)".to_string(),
            ));
        }
        let mut headless = !self.headful;
        if matches!(policy, ChallengePolicy::Manual { .. }) && headless {
            info!("Manual challenge policy selected, launching a visible browser");
            headless = false;
        }

        let gate = GateSettings {
            wait: Duration::from_secs(self.challenge_timeout),
            policy,
            submission_marker: self.submission_marker,
            ..GateSettings::default()
        };
        let scroll = ScrollSettings {
            quiet_interval: Duration::from_millis(self.scroll_interval),
            max_iterations: self.scroll_max_iterations,
            ..ScrollSettings::default()
        };
        let browser = BrowserOptions {
            headless,
            chrome_path: self.chrome,
            ..BrowserOptions::default()
        };
        let writer = ResultWriter::new(
            self.out.unwrap_or(preset.folder),
            self.name.or_else(|| preset.name.map(str::to_string)),
        );

        Ok(RunConfig {
            target,
            mode,
            json_resource,
            datasets,
            gate,
            scroll,
            browser,
            http_timeout: Duration::from_secs(30),
            budget: Duration::from_secs(self.budget),
            writer,
        })
    }
}

/// Reject empty selections and datasets the resource type cannot provide.
pub fn validate_datasets(datasets: &[DatasetRequest], json_resource: bool) -> Result<()> {
    if datasets.is_empty() {
        return Err(ScrapeError::Input("no datasets selected".to_string()));
    }
    let unsupported: Vec<&str> = datasets
        .iter()
        .filter(|d| if json_resource { !d.supports_json() } else { !d.supports_document() })
        .map(|d| d.name())
        .collect();
    if unsupported.is_empty() {
        return Ok(());
    }
    let resource = if json_resource { "a JSON resource" } else { "an HTML page" };
    Err(ScrapeError::Input(format!(
        "dataset(s) {} cannot be extracted from {}",
        unsupported.join(", "),
        resource
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["page-scraper"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn site_preset_is_direct_with_generic_datasets() {
        let config = cli(&["https://example.com"]).into_config().unwrap();
        assert_eq!(config.mode, AcquisitionMode::Direct);
        let names: Vec<_> = config.datasets.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["links", "images", "emails"]);
        assert!(config.writer.fixed_name.is_none());
    }

    #[test]
    fn brokers_preset_targets_json_records() {
        let config = cli(&["https://www.ibba.org/wp-json/brokers/all", "--preset", "brokers"])
            .into_config()
            .unwrap();
        assert_eq!(config.mode, AcquisitionMode::Browser);
        assert!(config.json_resource);
        assert_eq!(config.datasets.len(), 1);
        assert_eq!(config.datasets[0].name(), "brokers");
        assert_eq!(config.writer.fixed_name.as_deref(), Some("ibba-brokers"));
        assert_eq!(config.writer.folder, PathBuf::from("brokers"));
    }

    #[test]
    fn explicit_flags_override_preset() {
        let config = cli(&[
            "https://example.com/games",
            "--preset",
            "games",
            "--mode",
            "direct",
            "--datasets",
            "links,emails",
            "--out",
            "/tmp/out",
            "--name",
            "custom",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.mode, AcquisitionMode::Direct);
        let names: Vec<_> = config.datasets.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["links", "emails", "games"]);
        assert_eq!(config.writer.folder, PathBuf::from("/tmp/out"));
        assert_eq!(config.writer.fixed_name.as_deref(), Some("custom"));
    }

    #[test]
    fn rejects_non_http_urls() {
        for bad in ["ftp://example.com/file", "not a url", "   ", "file:///etc/passwd"] {
            let err = parse_target(bad).unwrap_err();
            assert!(matches!(err, ScrapeError::Input(_)), "{bad} accepted");
        }
        assert!(parse_target("http://localhost:8080/x").is_ok());
    }

    #[test]
    fn rejects_links_on_json_resource() {
        let err = cli(&["https://example.com/api", "--json"]).into_config().unwrap_err();
        match err {
            ScrapeError::Input(msg) => {
                assert!(msg.contains("links"));
                assert!(msg.contains("images"));
                assert!(!msg.contains("emails"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn rejects_json_records_on_html_page() {
        let err = cli(&["https://example.com", "--datasets", "links", "--records", "brokers"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Input(msg) if msg.contains("brokers")));
    }

    #[test]
    fn rejects_empty_selection() {
        assert!(matches!(validate_datasets(&[], false), Err(ScrapeError::Input(_))));
    }

    #[test]
    fn repeated_datasets_are_extracted_once() {
        let config = cli(&["https://example.com", "--datasets", "links,emails,links,emails"])
            .into_config()
            .unwrap();
        let names: Vec<_> = config.datasets.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["links", "emails"]);
    }

    #[test]
    fn submission_marker_needs_browser_mode() {
        let err = cli(&["https://example.com", "--submission-marker", "#results"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Input(msg) if msg.contains("--submission-marker")));

        let config = cli(&["https://example.com", "--mode", "browser", "--submission-marker", "#results"])
            .into_config()
            .unwrap();
        assert_eq!(config.gate.submission_marker.as_deref(), Some("#results"));
    }

    #[test]
    fn manual_policy_forces_visible_browser() {
        let config = cli(&["https://example.com", "--mode", "browser", "--challenge-policy", "manual"])
            .into_config()
            .unwrap();
        assert!(!config.browser.headless);
        assert_eq!(config.gate.policy, ChallengePolicy::Manual { timeout: None });

        let err = cli(&["https://example.com", "--challenge-policy", "manual"]).into_config().unwrap_err();
        assert!(matches!(err, ScrapeError::Input(_)));
    }
}
