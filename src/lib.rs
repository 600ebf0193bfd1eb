//! SiteScout CLI: wiring for the exploration engine.
//!
//! The binary resolves credentials, performs the login precondition, builds
//! the driver/policy/engine stack, and hands control to the iteration
//! controller. Everything interesting lives in the workspace crates.

pub mod auth;
pub mod cli;
