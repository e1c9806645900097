//! Challenge gate: detect anti-bot verification and wait it out.
//!
//! With no marker on the page the gate returns immediately without
//! sleeping. Otherwise it polls within a bounded window; what happens when
//! the window elapses is decided by [`ChallengePolicy`].

use std::cell::Cell;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::document::StaticDocument;
use crate::error::{Result, ScrapeError, Stage};
use crate::poll::{poll_until, Backoff};

/// Selectors that identify a known challenge widget.
pub const DEFAULT_SIGNATURES: &[&str] = &[
    r#"iframe[src*="recaptcha"]"#,
    r#"iframe[src*="hcaptcha.com"]"#,
    r#"iframe[src*="challenges.cloudflare.com"]"#,
    "#challenge-form",
    "#challenge-running",
    "#cf-challenge-running",
    ".cf-turnstile",
    ".g-recaptcha",
];

/// Something the gate can inspect for marker elements.
pub trait ChallengeProbe {
    fn has_element(&self, selector: &str) -> anyhow::Result<bool>;
}

/// What to do once the automatic wait window has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePolicy {
    /// Log and carry on with whatever the page shows.
    Continue,
    /// Ask the operator to solve it in the browser window, then wait up to
    /// `timeout` (forever when `None`, interruptible with Ctrl-C).
    Manual { timeout: Option<Duration> },
    /// Fail the run.
    Abort,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub signatures: Vec<String>,
    pub wait: Duration,
    pub poll_interval: Duration,
    pub policy: ChallengePolicy,
    /// Element that appears once a required form submission has completed.
    pub submission_marker: Option<String>,
    pub submission_timeout: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_SIGNATURES.iter().map(|s| s.to_string()).collect(),
            wait: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            policy: ChallengePolicy::Continue,
            submission_marker: None,
            submission_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// No marker found.
    Clear,
    /// Marker disappeared within the automatic window.
    Resolved { waited: Duration },
    /// Operator solved it.
    ResolvedManually { waited: Duration },
    /// Window elapsed; continuing best-effort.
    Unresolved { waited: Duration },
}

impl ChallengeProbe for StaticDocument {
    fn has_element(&self, selector: &str) -> anyhow::Result<bool> {
        self.has_match(selector)
    }
}

fn marker_present<P: ChallengeProbe + ?Sized>(probe: &P, signatures: &[String]) -> Option<String> {
    for sig in signatures {
        match probe.has_element(sig) {
            Ok(true) => return Some(sig.clone()),
            Ok(false) => {}
            Err(e) => debug!("challenge probe `{}` failed: {}", sig, e),
        }
    }
    None
}

/// Run the gate against `probe` for the page at `url`.
pub async fn pass_gate<P: ChallengeProbe + ?Sized>(probe: &P, url: &str, settings: &GateSettings) -> Result<GateOutcome> {
    let start = Instant::now();

    let outcome = match marker_present(probe, &settings.signatures) {
        None => {
            info!("✅ No challenge detected on {}", url);
            GateOutcome::Clear
        }
        Some(sig) => {
            warn!("🛡️ Challenge detected ({}), waiting up to {:?}", sig, settings.wait);
            let backoff = Backoff::exponential(settings.poll_interval, 2, settings.poll_interval * 4)
                .with_deadline(Some(settings.wait));
            let cleared = poll_until(&backoff, || marker_present(probe, &settings.signatures).is_none()).await;

            if cleared.is_satisfied() {
                info!("✅ Challenge cleared after {:?}", cleared.elapsed());
                GateOutcome::Resolved { waited: cleared.elapsed() }
            } else {
                resolve_after_timeout(probe, url, settings, start).await?
            }
        }
    };

    if let Some(marker) = &settings.submission_marker {
        wait_for_submission(probe, url, marker, settings.submission_timeout).await?;
    }
    Ok(outcome)
}

/// Gate for a fetched response that cannot change: a marker is reported
/// and only the abort policy fails the run.
pub fn inspect_static<P: ChallengeProbe + ?Sized>(probe: &P, url: &str, settings: &GateSettings) -> Result<GateOutcome> {
    let Some(sig) = marker_present(probe, &settings.signatures) else {
        debug!("No challenge marker in response from {}", url);
        return Ok(GateOutcome::Clear);
    };
    if settings.policy == ChallengePolicy::Abort {
        return Err(ScrapeError::ChallengeTimeout {
            url: url.to_string(),
            waited: Duration::ZERO,
        });
    }
    warn!("🛡️ Response from {} carries a challenge ({}); retry with --mode browser", url, sig);
    Ok(GateOutcome::Unresolved { waited: Duration::ZERO })
}

async fn resolve_after_timeout<P: ChallengeProbe + ?Sized>(
    probe: &P,
    url: &str,
    settings: &GateSettings,
    start: Instant,
) -> Result<GateOutcome> {
    match settings.policy {
        ChallengePolicy::Continue => {
            warn!("⚠️ Challenge still present after {:?}, proceeding anyway", start.elapsed());
            Ok(GateOutcome::Unresolved { waited: start.elapsed() })
        }
        ChallengePolicy::Abort => Err(ScrapeError::ChallengeTimeout {
            url: url.to_string(),
            waited: start.elapsed(),
        }),
        ChallengePolicy::Manual { timeout } => {
            match timeout {
                Some(t) => warn!("🙋 Solve the challenge in the browser window (waiting up to {:?})", t),
                None => warn!("🙋 Solve the challenge in the browser window (Ctrl-C to abort)"),
            }
            // A lone probe failure counts as "still present". A closed
            // browser or a run of failures cancels the wait.
            let failures = Cell::new(0u32);
            let browser_gone = Cell::new(false);
            let backoff = Backoff::exponential(settings.poll_interval, 2, settings.poll_interval * 4).with_deadline(timeout);
            let solved = poll_until(&backoff, || {
                for sig in &settings.signatures {
                    match probe.has_element(sig) {
                        Ok(false) => {}
                        Ok(true) => {
                            failures.set(0);
                            return false;
                        }
                        Err(e) => {
                            failures.set(failures.get() + 1);
                            debug!("manual wait probe failed ({}x): {}", failures.get(), e);
                            if failures.get() >= MAX_PROBE_FAILURES || connection_lost(&e) {
                                browser_gone.set(true);
                                return true;
                            }
                            return false;
                        }
                    }
                }
                true
            });

            tokio::select! {
                outcome = solved => {
                    if browser_gone.get() {
                        warn!("Browser went away while waiting for manual challenge resolution");
                        Err(ScrapeError::Cancelled { url: url.to_string() })
                    } else if outcome.is_satisfied() {
                        info!("✅ Challenge solved manually after {:?}", start.elapsed());
                        Ok(GateOutcome::ResolvedManually { waited: start.elapsed() })
                    } else {
                        Err(ScrapeError::ChallengeTimeout { url: url.to_string(), waited: start.elapsed() })
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted while waiting for manual challenge resolution");
                    Err(ScrapeError::Cancelled { url: url.to_string() })
                }
            }
        }
    }
}

/// Consecutive probe failures that end a manual wait.
const MAX_PROBE_FAILURES: u32 = 5;

fn connection_lost(err: &anyhow::Error) -> bool {
    let message = format!("{:#}", err).to_lowercase();
    (message.contains("connection") && (message.contains("closed") || message.contains("lost")))
        || message.contains("browser closed")
        || message.contains("channel closed")
}

async fn wait_for_submission<P: ChallengeProbe + ?Sized>(probe: &P, url: &str, marker: &str, timeout: Duration) -> Result<()> {
    info!("⏳ Waiting for form submission to complete ({})", marker);
    let backoff = Backoff::fixed(Duration::from_millis(500), timeout);
    let done = poll_until(&backoff, || probe.has_element(marker).unwrap_or(false)).await;
    if done.is_satisfied() {
        Ok(())
    } else {
        Err(ScrapeError::fetch(
            Stage::ChallengeGate,
            url,
            format!("form submission marker `{}` did not appear within {:?}", marker, timeout),
        ))
    }
}
