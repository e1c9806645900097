//! Bounded polling with backoff.
//!
//! Every wait in the pipeline (network idle, challenge resolution, form
//! submission) goes through [`poll_until`] so that each one carries an
//! explicit attempt cap and deadline. Leaving both unset gives an unbounded
//! wait, which callers must race against an operator interrupt.

use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Interval schedule for a polling loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub max_interval: Duration,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl Backoff {
    /// Fixed interval, bounded by `deadline`.
    pub fn fixed(interval: Duration, deadline: Duration) -> Self {
        Self {
            initial: interval,
            factor: 1,
            max_interval: interval,
            max_attempts: None,
            deadline: Some(deadline),
        }
    }

    /// Interval grows by `factor` each attempt up to `max_interval`.
    pub fn exponential(initial: Duration, factor: u32, max_interval: Duration) -> Self {
        Self {
            initial,
            factor: factor.max(1),
            max_interval,
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Interval to sleep after `attempt` (1-based) failed.
    pub fn interval_after(&self, attempt: u32) -> Duration {
        let mut interval = self.initial;
        for _ in 1..attempt {
            interval = interval.saturating_mul(self.factor);
            if interval >= self.max_interval {
                return self.max_interval;
            }
        }
        interval.min(self.max_interval)
    }
}

/// Result of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied { attempts: u32, elapsed: Duration },
    Exhausted { attempts: u32, elapsed: Duration },
}

impl PollOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Satisfied { elapsed, .. } | PollOutcome::Exhausted { elapsed, .. } => *elapsed,
        }
    }
}

/// Run `check` until it returns true or the schedule is exhausted.
///
/// The first check happens immediately; a satisfied first check never sleeps.
pub async fn poll_until<F>(backoff: &Backoff, mut check: F) -> PollOutcome
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if check() {
            return PollOutcome::Satisfied {
                attempts: attempt,
                elapsed: start.elapsed(),
            };
        }

        if backoff.max_attempts.map_or(false, |max| attempt >= max) {
            break;
        }

        let mut wait = backoff.interval_after(attempt);
        if let Some(deadline) = backoff.deadline {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                break;
            }
            wait = wait.min(deadline - elapsed);
        }
        sleep(wait).await;
    }

    PollOutcome::Exhausted {
        attempts: attempt,
        elapsed: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_interval_is_capped() {
        let backoff = Backoff::exponential(Duration::from_millis(100), 2, Duration::from_millis(500));
        assert_eq!(backoff.interval_after(1), Duration::from_millis(100));
        assert_eq!(backoff.interval_after(2), Duration::from_millis(200));
        assert_eq!(backoff.interval_after(3), Duration::from_millis(400));
        assert_eq!(backoff.interval_after(4), Duration::from_millis(500));
        assert_eq!(backoff.interval_after(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn satisfied_first_check_does_not_sleep() {
        let backoff = Backoff::fixed(Duration::from_secs(5), Duration::from_secs(60));
        let outcome = poll_until(&backoff, || true).await;
        assert!(outcome.is_satisfied());
        assert!(outcome.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let backoff = Backoff {
            max_attempts: Some(4),
            ..Backoff::fixed(Duration::from_millis(1), Duration::from_secs(10))
        };
        let mut calls = 0;
        let outcome = poll_until(&backoff, || {
            calls += 1;
            false
        })
        .await;
        assert!(matches!(outcome, PollOutcome::Exhausted { attempts: 4, .. }));
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn stops_at_deadline() {
        let backoff = Backoff::fixed(Duration::from_millis(5), Duration::from_millis(30));
        let outcome = poll_until(&backoff, || false).await;
        assert!(!outcome.is_satisfied());
        assert!(outcome.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn satisfied_after_a_few_attempts() {
        let backoff = Backoff::exponential(Duration::from_millis(1), 2, Duration::from_millis(4));
        let mut calls = 0;
        let outcome = poll_until(&backoff, || {
            calls += 1;
            calls == 3
        })
        .await;
        assert!(matches!(outcome, PollOutcome::Satisfied { attempts: 3, .. }));
    }
}
