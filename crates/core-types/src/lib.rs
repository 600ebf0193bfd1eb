//! Shared primitives for the SiteScout exploration engine.
//!
//! Every other crate in the workspace speaks these types: session identity,
//! the error taxonomy, the locator model, the action/decision data model, and
//! the single backoff policy reused wherever the engine has to wait and retry.

pub mod action;
pub mod backoff;
pub mod errors;
pub mod locator;

pub use action::{
    Action, ActionDetails, ActionKind, ActionResult, ActionSignature, ActionTarget, Decision,
};
pub use backoff::BackoffPolicy;
pub use errors::ExploreError;
pub use locator::{Locator, LocatorStrategy};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one exploration session.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
