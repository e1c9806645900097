//! Error taxonomy for a scrape run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Launch,
    Fetch,
    ChallengeGate,
    Scroll,
    Extract,
    Write,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Launch => "launch",
            Stage::Fetch => "fetch",
            Stage::ChallengeGate => "challenge-gate",
            Stage::Scroll => "scroll",
            Stage::Extract => "extract",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All fatal outcomes of a run.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("[{stage}] {url}: {message}")]
    Fetch {
        stage: Stage,
        url: String,
        message: String,
    },

    #[error("[challenge-gate] {url}: challenge still present after {waited:?}")]
    ChallengeTimeout { url: String, waited: Duration },

    #[error("[extract] {url}: dataset `{dataset}` does not match the expected shape: {description}")]
    SchemaMismatch {
        url: String,
        dataset: String,
        description: String,
    },

    #[error("[write] {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[challenge-gate] {url}: interrupted while waiting for manual resolution")]
    Cancelled { url: String },
}

impl ScrapeError {
    pub fn fetch(stage: Stage, url: impl Into<String>, err: impl fmt::Display) -> Self {
        ScrapeError::Fetch {
            stage,
            url: url.into(),
            message: err.to_string(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScrapeError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Stage label for reporting.
    pub fn stage(&self) -> &'static str {
        match self {
            ScrapeError::Input(_) => "input",
            ScrapeError::Fetch { stage, .. } => stage.as_str(),
            ScrapeError::ChallengeTimeout { .. } | ScrapeError::Cancelled { .. } => "challenge-gate",
            ScrapeError::SchemaMismatch { .. } => "extract",
            ScrapeError::Persistence { .. } => "write",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_names_stage_and_target() {
        let err = ScrapeError::fetch(Stage::Scroll, "https://example.com", "tab crashed");
        assert_eq!(err.to_string(), "[scroll] https://example.com: tab crashed");
        assert_eq!(err.stage(), "scroll");
    }

    #[test]
    fn schema_mismatch_carries_payload_description() {
        let err = ScrapeError::SchemaMismatch {
            url: "https://example.com/api".into(),
            dataset: "brokers".into(),
            description: "expected an array, found object".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("brokers"));
        assert!(msg.contains("found object"));
    }
}
