//! Exploration engine: the iteration controller and run persistence.
//!
//! One [`Explorer`] drives one browser session, strictly sequentially:
//! capture the page, ask the decision policy for a batch, execute it,
//! checkpoint everything learned, and re-evaluate termination — until the
//! coverage estimate crosses its threshold or the iteration cap is hit.

pub mod config;
pub mod engine;
pub mod store;

pub use config::ExplorerConfig;
pub use engine::{Explorer, ExploreOutcome, ExploreStatus};
pub use store::RunStore;
