//! Decision policies: given the current page and the session's learning
//! state, produce a prioritized, deduplicated batch of next actions.
//!
//! Two interchangeable strategies sit behind [`DecisionPolicy`]: a fixed
//! [`HeuristicPolicy`] priority table and an [`OraclePolicy`] that consults
//! an external advisory service. Both run their raw output through the same
//! [`filters::finalize`] pass before returning: drop already-tried
//! signatures, drop denylisted targets, sort by priority, cap the batch.

pub mod filters;
pub mod heuristic;
pub mod oracle;

use async_trait::async_trait;
use learning_store::LearningState;
use page_perceiver::PageState;
use sitescout_core_types::{Decision, ExploreError};

pub use heuristic::HeuristicPolicy;
pub use oracle::{
    parse_decision, HttpOracleClient, MockOracleClient, OracleClient, OraclePolicy, OracleRequest,
};

/// Default cap on actions returned per iteration.
pub const DEFAULT_MAX_ACTIONS: usize = 5;

/// Strategy selector, used by the CLI and wiring code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Heuristic,
    Oracle,
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "oracle" => Ok(Self::Oracle),
            other => Err(format!("unknown policy '{other}', expected heuristic|oracle")),
        }
    }
}

/// A pluggable next-action strategy.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    /// Produce the next decision for the captured page.
    ///
    /// Implementations must return already-finalized decisions: deduplicated
    /// against `state.explored_interactions`, denylist-filtered, priority
    /// sorted, and capped.
    async fn decide(
        &self,
        page: &PageState,
        state: &LearningState,
        goal: &str,
    ) -> Result<Decision, ExploreError>;

    /// Short name for logs and reports.
    fn name(&self) -> &'static str;
}
