//! Convergence scroller.
//!
//! Scrolls to the bottom, waits for lazy content, and repeats until the
//! content height stops changing. An iteration cap and a wall-clock cap end
//! the loop on pages that keep growing forever (infinite feeds, injected ads).

use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// A page that can be measured and scrolled.
pub trait ScrollSurface {
    fn content_height(&self) -> Result<u64>;
    fn scroll_to_bottom(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ScrollSettings {
    /// Pause after each scroll for network-driven content.
    pub quiet_interval: Duration,
    pub max_iterations: u32,
    pub max_duration: Duration,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_secs(3),
            max_iterations: 50,
            max_duration: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    /// Height unchanged between two consecutive measurements.
    Converged { iterations: u32, height: u64 },
    /// Stopped by the iteration or wall-clock cap.
    CapReached { iterations: u32, height: u64 },
}

impl ScrollOutcome {
    pub fn iterations(&self) -> u32 {
        match self {
            ScrollOutcome::Converged { iterations, .. } | ScrollOutcome::CapReached { iterations, .. } => *iterations,
        }
    }
}

/// Drive progressive rendering until the page stops growing.
pub async fn scroll_until_stable<S: ScrollSurface + ?Sized>(surface: &S, settings: &ScrollSettings) -> Result<ScrollOutcome> {
    let start = Instant::now();
    let mut previous = surface.content_height()?;
    let mut iterations = 0;

    while iterations < settings.max_iterations {
        iterations += 1;
        surface.scroll_to_bottom()?;
        sleep(settings.quiet_interval).await;

        let height = surface.content_height()?;
        debug!("scroll #{}: height {} -> {}", iterations, previous, height);
        if height == previous {
            info!("📜 Page converged at height {} after {} scroll(s)", height, iterations);
            return Ok(ScrollOutcome::Converged { iterations, height });
        }
        previous = height;

        if start.elapsed() >= settings.max_duration {
            break;
        }
    }

    warn!(
        "⚠️ Page still growing after {} scroll(s) / {:?}, extracting what is loaded",
        iterations,
        start.elapsed()
    );
    Ok(ScrollOutcome::CapReached {
        iterations,
        height: previous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Grows by `step` on each scroll until `final_height` (no limit when None).
    struct FakeFeed {
        height: Cell<u64>,
        step: u64,
        final_height: Option<u64>,
        scrolls: Cell<u32>,
    }

    impl FakeFeed {
        fn new(step: u64, final_height: Option<u64>) -> Self {
            Self {
                height: Cell::new(1000),
                step,
                final_height,
                scrolls: Cell::new(0),
            }
        }
    }

    impl ScrollSurface for FakeFeed {
        fn content_height(&self) -> Result<u64> {
            Ok(self.height.get())
        }

        fn scroll_to_bottom(&self) -> Result<()> {
            self.scrolls.set(self.scrolls.get() + 1);
            let next = self.height.get() + self.step;
            self.height.set(self.final_height.map_or(next, |max| next.min(max)));
            Ok(())
        }
    }

    fn quick(max_iterations: u32) -> ScrollSettings {
        ScrollSettings {
            quiet_interval: Duration::from_millis(1),
            max_iterations,
            max_duration: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn converges_once_height_is_stable() {
        let feed = FakeFeed::new(500, Some(2500));
        let outcome = scroll_until_stable(&feed, &quick(50)).await.unwrap();
        // 1000 -> 1500 -> 2000 -> 2500 -> 2500
        assert_eq!(outcome, ScrollOutcome::Converged { iterations: 4, height: 2500 });
    }

    #[tokio::test]
    async fn static_page_converges_after_one_scroll() {
        let feed = FakeFeed::new(0, None);
        let outcome = scroll_until_stable(&feed, &quick(50)).await.unwrap();
        assert_eq!(outcome, ScrollOutcome::Converged { iterations: 1, height: 1000 });
    }

    #[tokio::test]
    async fn endlessly_growing_page_hits_iteration_cap() {
        let feed = FakeFeed::new(250, None);
        let outcome = scroll_until_stable(&feed, &quick(7)).await.unwrap();
        assert!(matches!(outcome, ScrollOutcome::CapReached { iterations: 7, .. }));
        assert_eq!(feed.scrolls.get(), 7);
    }

    #[tokio::test]
    async fn endlessly_growing_page_hits_time_cap() {
        let feed = FakeFeed::new(250, None);
        let settings = ScrollSettings {
            quiet_interval: Duration::from_millis(5),
            max_iterations: u32::MAX,
            max_duration: Duration::from_millis(30),
        };
        let outcome = scroll_until_stable(&feed, &settings).await.unwrap();
        assert!(matches!(outcome, ScrollOutcome::CapReached { .. }));
        assert!(outcome.iterations() < 100);
    }

    #[tokio::test]
    async fn surface_errors_propagate() {
        struct Broken;
        impl ScrollSurface for Broken {
            fn content_height(&self) -> Result<u64> {
                Err(anyhow::anyhow!("tab crashed"))
            }
            fn scroll_to_bottom(&self) -> Result<()> {
                Ok(())
            }
        }
        assert!(scroll_until_stable(&Broken, &quick(3)).await.is_err());
    }
}
