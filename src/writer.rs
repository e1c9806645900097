//! Output artifact assembly and persistence.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{Result, ScrapeError};
use crate::extractor::ExtractionResult;

const MAX_SANITIZED_LEN: usize = 120;

/// Final on-disk representation of one run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputArtifact {
    pub timestamp: String,
    pub source_url: String,
    pub count: usize,
    pub counts: BTreeMap<String, usize>,
    #[serde(flatten)]
    pub datasets: BTreeMap<String, Value>,
}

impl OutputArtifact {
    pub fn new(source_url: &str, timestamp: &str, results: &[ExtractionResult]) -> Self {
        let counts: BTreeMap<String, usize> = results.iter().map(|r| (r.name.clone(), r.len())).collect();
        Self {
            timestamp: timestamp.to_string(),
            source_url: source_url.to_string(),
            count: counts.values().sum(),
            counts,
            datasets: results.iter().map(|r| (r.name.clone(), r.to_json())).collect(),
        }
    }
}

/// Lowercase; every non-alphanumeric char becomes `_`.
pub fn sanitize_source(source: &str) -> String {
    source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(MAX_SANITIZED_LEN)
        .collect()
}

/// ISO-8601 with filename-unsafe characters replaced, e.g. `2024-05-01T12-30-00-123Z`.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// `<folder>/<sanitized source or fixed name>_<timestamp>.json`
pub fn artifact_path(folder: &Path, source: &str, fixed_name: Option<&str>, timestamp: &str) -> PathBuf {
    let stem = match fixed_name {
        Some(name) => name.to_string(),
        None => sanitize_source(source),
    };
    folder.join(format!("{}_{}.json", stem, timestamp))
}

// Temp files start out owner-only; artifacts get ordinary file permissions.
#[cfg(unix)]
fn make_world_readable(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_world_readable(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

/// Where and how to write artifacts.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    pub folder: PathBuf,
    pub fixed_name: Option<String>,
}

impl ResultWriter {
    pub fn new(folder: impl Into<PathBuf>, fixed_name: Option<String>) -> Self {
        Self {
            folder: folder.into(),
            fixed_name,
        }
    }

    /// Write the artifact for `results` as of `at`. The file appears
    /// complete or not at all, and an existing file is never replaced.
    pub fn write(&self, source_url: &str, results: &[ExtractionResult], at: DateTime<Utc>) -> Result<PathBuf> {
        let timestamp = file_timestamp(at);
        let path = artifact_path(&self.folder, source_url, self.fixed_name.as_deref(), &timestamp);
        let artifact = OutputArtifact::new(source_url, &timestamp, results);

        std::fs::create_dir_all(&self.folder).map_err(|e| ScrapeError::persistence(&self.folder, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.folder).map_err(|e| ScrapeError::persistence(&path, e))?;
        serde_json::to_writer_pretty(&mut tmp, &artifact).map_err(|e| ScrapeError::persistence(&path, e.into()))?;
        tmp.write_all(b"\n")
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| ScrapeError::persistence(&path, e))?;
        make_world_readable(tmp.as_file()).map_err(|e| ScrapeError::persistence(&path, e))?;
        tmp.persist_noclobber(&path)
            .map_err(|e| ScrapeError::persistence(&path, e.error))?;

        info!("💾 Saved {} item(s) to {}", artifact.count, path.display());
        Ok(path)
    }
}
