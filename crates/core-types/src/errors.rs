//! Error taxonomy shared across the exploration engine.

use thiserror::Error;

/// Errors surfaced by the exploration engine and its collaborators.
///
/// Only [`ExploreError::DriverFatal`] aborts a run. Everything else is caught
/// at the point of occurrence, recorded in the session's error log, and the
/// iteration loop continues.
#[derive(Debug, Error, Clone)]
pub enum ExploreError {
    /// Every locator strategy for an element was exhausted without a match.
    #[error("locator not found: {0}")]
    LocatorNotFound(String),

    /// The element was resolved but is disabled, hidden, or otherwise inert.
    #[error("element not interactable: {0}")]
    ElementNotInteractable(String),

    /// A navigation did not settle within its deadline.
    #[error("navigation timeout: {0}")]
    NavigationTimeout(String),

    /// An anti-automation defense was detected; handled as a scheduled pause.
    #[error("protection challenge: {0}")]
    ProtectionChallenge(String),

    /// The advisory service returned something that does not parse into a
    /// valid decision.
    #[error("oracle response malformed: {0}")]
    OracleMalformed(String),

    /// A checkpoint or report write failed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The underlying browser session became unusable.
    #[error("driver fatal: {0}")]
    DriverFatal(String),
}

impl ExploreError {
    pub fn locator_not_found(message: impl Into<String>) -> Self {
        Self::LocatorNotFound(message.into())
    }

    pub fn not_interactable(message: impl Into<String>) -> Self {
        Self::ElementNotInteractable(message.into())
    }

    pub fn navigation_timeout(message: impl Into<String>) -> Self {
        Self::NavigationTimeout(message.into())
    }

    pub fn oracle_malformed(message: impl Into<String>) -> Self {
        Self::OracleMalformed(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn driver_fatal(message: impl Into<String>) -> Self {
        Self::DriverFatal(message.into())
    }

    /// Whether this error must abort the session instead of being logged
    /// and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DriverFatal(_))
    }
}
