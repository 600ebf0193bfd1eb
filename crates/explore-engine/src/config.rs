//! Configuration for an exploration run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the iteration controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Known-good URL used to recover from stuck/looping states and as the
    /// session's starting point.
    pub anchor_url: String,

    /// Iteration cap; the loop terminates once the counter passes it.
    /// Default: 40
    pub max_iterations: u32,

    /// Coverage estimate (0-100) at which the run is considered done.
    /// Default: 95
    pub coverage_threshold: u8,

    /// Consecutive identical post-action page identities before a forced
    /// anchor navigation.
    /// Default: 4
    pub stuck_window: u32,

    /// Iterations to complete before stuck detection arms.
    /// Default: 5
    pub stuck_min_iterations: u32,

    /// Per-navigation deadline.
    pub nav_timeout: Duration,

    /// Upper bound on any single checkpoint write.
    pub persist_timeout: Duration,

    /// Randomized pacing bounds between actions, milliseconds.
    pub pacing_ms: (u64, u64),
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            anchor_url: String::new(),
            max_iterations: 40,
            coverage_threshold: 95,
            stuck_window: 4,
            stuck_min_iterations: 5,
            nav_timeout: Duration::from_secs(20),
            persist_timeout: Duration::from_secs(5),
            pacing_ms: (400, 1_600),
        }
    }
}

impl ExplorerConfig {
    pub fn new(anchor_url: impl Into<String>) -> Self {
        Self {
            anchor_url: anchor_url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_coverage_threshold(mut self, threshold: u8) -> Self {
        self.coverage_threshold = threshold.min(100);
        self
    }

    pub fn with_stuck_window(mut self, window: u32) -> Self {
        self.stuck_window = window.max(1);
        self
    }

    pub fn with_pacing_ms(mut self, min: u64, max: u64) -> Self {
        self.pacing_ms = (min, max);
        self
    }
}
