//! Protection Detector & Backoff: watches rendered content for
//! anti-automation defenses and pauses the session accordingly.
//!
//! Two signal classes are distinguished: verification challenges (long,
//! possibly human-required cooldown) and throttling banners (short automatic
//! cooldown). A cooldown is a pause, not a reset — pending work is never
//! touched. The iteration controller calls [`Sentinel::check_and_wait`]
//! before and after navigation-heavy operations.

use std::time::Duration;

use cdp_driver::Driver;
use serde::{Deserialize, Serialize};
use sitescout_core_types::backoff::apply_jitter;
use sitescout_core_types::ExploreError;
use tracing::{debug, info, warn};

/// Markup fragments that indicate a verification challenge.
pub const VERIFICATION_PATTERNS: &[&str] = &[
    "captcha",
    "verify you are human",
    "verify you're human",
    "are you a robot",
    "security check",
    "unusual activity",
    "suspicious activity",
];

/// Markup fragments that indicate throttling / rate limiting.
pub const THROTTLE_PATTERNS: &[&str] = &[
    "rate limit",
    "too many requests",
    "slow down",
    "temporarily blocked",
    "try again in a few",
];

/// The two defense classes the sentinel reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionSignal {
    /// Human-oriented challenge; long cooldown.
    Verification,
    /// Automated throttling; short cooldown.
    Throttle,
}

impl ProtectionSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ProtectionSignal::Verification => "verification",
            ProtectionSignal::Throttle => "throttle",
        }
    }
}

/// Cooldown configuration.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub verification_cooldown: Duration,
    pub throttle_cooldown: Duration,
    /// Jitter fraction applied on top of each cooldown.
    pub jitter: f64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            verification_cooldown: Duration::from_secs(120),
            throttle_cooldown: Duration::from_secs(20),
            jitter: 0.15,
        }
    }
}

/// Scans page content for protection signals and blocks through cooldowns.
#[derive(Debug, Clone, Default)]
pub struct Sentinel {
    config: SentinelConfig,
}

impl Sentinel {
    pub fn new(config: SentinelConfig) -> Self {
        Self { config }
    }

    /// Classify page content. Verification outranks throttling when both
    /// pattern sets match.
    pub fn detect(content: &str) -> Option<ProtectionSignal> {
        let lower = content.to_lowercase();
        if VERIFICATION_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Some(ProtectionSignal::Verification);
        }
        if THROTTLE_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Some(ProtectionSignal::Throttle);
        }
        None
    }

    /// Cooldown duration for a signal, jittered.
    pub fn cooldown_for(&self, signal: ProtectionSignal) -> Duration {
        let base = match signal {
            ProtectionSignal::Verification => self.config.verification_cooldown,
            ProtectionSignal::Throttle => self.config.throttle_cooldown,
        };
        Duration::from_millis(apply_jitter(base.as_millis() as u64, self.config.jitter))
    }

    /// Inspect the current page and, when a defense is present, block for
    /// the appropriate cooldown before returning. Returns the signal that
    /// was waited out, if any. Never discards pending work.
    pub async fn check_and_wait(
        &self,
        driver: &dyn Driver,
    ) -> Result<Option<ProtectionSignal>, ExploreError> {
        let content = match driver.content().await {
            Ok(content) => content,
            Err(err) if err.is_fatal() => return Err(err.into_explore("protection scan")),
            Err(err) => {
                debug!("protection scan skipped, content unavailable: {err}");
                return Ok(None);
            }
        };

        let Some(signal) = Self::detect(&content) else {
            return Ok(None);
        };

        let cooldown = self.cooldown_for(signal);
        warn!(
            signal = signal.name(),
            cooldown_ms = cooldown.as_millis() as u64,
            "protection challenge detected, pausing session"
        );
        tokio::time::sleep(cooldown).await;
        info!(signal = signal.name(), "cooldown elapsed, resuming");
        Ok(Some(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdp_driver::DriverError;
    use serde_json::Value;
    use std::time::Instant;

    struct StaticPage {
        content: String,
    }

    #[async_trait]
    impl Driver for StaticPage {
        async fn navigate(&self, _url: &str, _t: Duration) -> Result<(), DriverError> {
            Ok(())
        }
        async fn evaluate(&self, _js: &str) -> Result<Value, DriverError> {
            Ok(Value::Null)
        }
        async fn click_css(&self, _s: &str, _t: Duration) -> Result<(), DriverError> {
            Ok(())
        }
        async fn type_css(&self, _s: &str, _x: &str, _t: Duration) -> Result<(), DriverError> {
            Ok(())
        }
        async fn current_url(&self) -> Result<String, DriverError> {
            Ok("https://app.test".into())
        }
        async fn title(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        async fn content(&self) -> Result<String, DriverError> {
            Ok(self.content.clone())
        }
        async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn verification_outranks_throttling() {
        let both = "Unusual activity detected. Too many requests.";
        assert_eq!(Sentinel::detect(both), Some(ProtectionSignal::Verification));
        assert_eq!(
            Sentinel::detect("Error 429: rate limit exceeded"),
            Some(ProtectionSignal::Throttle)
        );
        assert_eq!(Sentinel::detect("<h1>Job board</h1>"), None);
    }

    #[test]
    fn detection_is_case_insensitive() {
        assert_eq!(
            Sentinel::detect("Please complete the CAPTCHA below"),
            Some(ProtectionSignal::Verification)
        );
    }

    #[tokio::test]
    async fn throttle_banner_blocks_for_at_least_the_configured_delay() {
        let sentinel = Sentinel::new(SentinelConfig {
            verification_cooldown: Duration::from_millis(200),
            throttle_cooldown: Duration::from_millis(60),
            jitter: 0.0,
        });
        let page = StaticPage {
            content: "<div class='banner'>Too many requests, slow down.</div>".into(),
        };

        let start = Instant::now();
        let signal = sentinel.check_and_wait(&page).await.unwrap();
        assert_eq!(signal, Some(ProtectionSignal::Throttle));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn clean_pages_do_not_pause() {
        let sentinel = Sentinel::new(SentinelConfig {
            verification_cooldown: Duration::from_millis(200),
            throttle_cooldown: Duration::from_millis(60),
            jitter: 0.0,
        });
        let page = StaticPage {
            content: "<main>Contacts</main>".into(),
        };

        let start = Instant::now();
        assert_eq!(sentinel.check_and_wait(&page).await.unwrap(), None);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
