//! Locator model: how an element can be found again at execution time.
//!
//! The DOM can mutate between capture and execution, so every captured
//! element carries at least two independent locators. Resolution walks the
//! declared order and falls back to a text match as the last resort.

use serde::{Deserialize, Serialize};

/// Locator strategy enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    /// CSS selector built from a stable identifier (id, name, aria-label).
    Css,

    /// Structural path selector (nth-of-type chain from the document root).
    Path,

    /// Visible text content match.
    Text,
}

impl LocatorStrategy {
    /// Strategy name as used in signatures and logs.
    pub fn name(&self) -> &'static str {
        match self {
            LocatorStrategy::Css => "css",
            LocatorStrategy::Path => "path",
            LocatorStrategy::Text => "text",
        }
    }

    /// All strategies in resolution order.
    pub fn fallback_chain() -> [LocatorStrategy; 3] {
        [
            LocatorStrategy::Css,
            LocatorStrategy::Path,
            LocatorStrategy::Text,
        ]
    }
}

/// One concrete way to find an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    pub fn css(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Css,
            value: value.into(),
        }
    }

    pub fn path(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Path,
            value: value.into(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Text,
            value: value.into(),
        }
    }

    /// Normalized identifier of "how this element is found", used for action
    /// dedup. Text locators normalize casing and whitespace so cosmetic DOM
    /// changes do not defeat the never-twice invariant.
    pub fn signature(&self) -> String {
        match self.strategy {
            LocatorStrategy::Text => format!(
                "{}:{}",
                self.strategy.name(),
                self.value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
            ),
            _ => format!("{}:{}", self.strategy.name(), self.value),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.strategy.name(), self.value)
    }
}
