//! Browser driver seam for SiteScout.
//!
//! The exploration engine only requires the small capability surface in
//! [`Driver`]: navigate, evaluate a script into structured data, click/type
//! on a resolved selector, and capture content/screenshots. The concrete
//! Chromium implementation lives in [`cdp`]; everything above this crate
//! depends on the trait alone so tests can script a page.

pub mod cdp;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sitescout_core_types::ExploreError;
use thiserror::Error;

pub use cdp::{CdpDriver, LaunchOptions};

/// Errors emitted by a browser driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An operation did not settle within its deadline.
    #[error("driver timeout: {0}")]
    Timeout(String),

    /// No element matched the given selector.
    #[error("no element for selector: {0}")]
    NotFound(String),

    /// The protocol call failed but the session is still usable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The browser or session is gone; nothing further will succeed.
    #[error("session unusable: {0}")]
    Session(String),
}

impl DriverError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Session(_))
    }

    /// Map into the engine's error taxonomy. Session loss is fatal; a
    /// timeout on a navigation-class operation becomes a retryable
    /// `NavigationTimeout`; the rest are per-action failures.
    pub fn into_explore(self, context: &str) -> ExploreError {
        match self {
            Self::Session(msg) => ExploreError::driver_fatal(format!("{context}: {msg}")),
            Self::Timeout(msg) => ExploreError::navigation_timeout(format!("{context}: {msg}")),
            Self::NotFound(msg) => ExploreError::locator_not_found(format!("{context}: {msg}")),
            Self::Protocol(msg) => {
                ExploreError::ElementNotInteractable(format!("{context}: {msg}"))
            }
        }
    }
}

/// Opaque browser capability surface required by the engine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate the session's page and wait for the load to settle.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&self, js: &str) -> Result<Value, DriverError>;

    /// Click the first element matching a CSS selector.
    async fn click_css(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Focus the first element matching a CSS selector and type into it.
    async fn type_css(
        &self,
        selector: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// URL the page currently shows.
    async fn current_url(&self) -> Result<String, DriverError>;

    /// Current document title.
    async fn title(&self) -> Result<String, DriverError>;

    /// Rendered page content (outer HTML), used for protection scanning.
    async fn content(&self) -> Result<String, DriverError>;

    /// PNG screenshot of the viewport, for diagnostic captures.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_loss_maps_to_fatal() {
        let err = DriverError::Session("ws closed".into());
        assert!(err.is_fatal());
        assert!(err.into_explore("navigate").is_fatal());
    }

    #[test]
    fn timeout_maps_to_navigation_timeout() {
        let err = DriverError::Timeout("load event".into()).into_explore("goto /slow");
        assert!(matches!(err, ExploreError::NavigationTimeout(_)));
        assert!(!err.is_fatal());
    }
}
