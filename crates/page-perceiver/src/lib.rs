//! DOM Introspector: snapshots the current page's interactive surface.
//!
//! One injected script walks the attached DOM and returns raw element
//! descriptors; the parser turns those into a [`PageState`] of categorized
//! [`PageElement`]s, each carrying at least two independent locator
//! strategies plus the semantic hints later field classification needs.
//! Capture is read-only and total: partially rendered pages produce partial
//! states, never errors.

pub mod model;
pub mod snapshot;

pub use model::{page_key, resolve_href, ElementCategory, PageElement, PageState, SelectOption};
pub use snapshot::{PagePerceiver, SNAPSHOT_JS};
