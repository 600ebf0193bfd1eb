//! Shared action filtering: denylist, dedup, ordering, batch cap.

use learning_store::LearningState;
use page_perceiver::PageState;
use sitescout_core_types::{Action, Decision};
use tracing::debug;

/// Text patterns that exclude an action target outright. Matching is
/// case-insensitive substring over the target's selector, label, and URL.
pub const DENYLIST_PATTERNS: &[&str] = &[
    "upgrade",
    "pricing",
    "billing",
    "subscribe",
    "payment",
    "checkout",
    "logout",
    "log out",
    "sign out",
    "delete account",
    "unsubscribe",
    "terms of service",
    "privacy policy",
];

/// Text patterns that suggest a creation/edit trigger — the second-highest
/// heuristic tier and a common modal opener.
pub const CREATION_PATTERNS: &[&str] = &["add", "create", "new", "edit", "compose", "invite"];

pub fn is_denylisted(text: &str) -> bool {
    let lower = text.to_lowercase();
    DENYLIST_PATTERNS.iter().any(|p| lower.contains(p))
}

pub fn looks_like_creation_trigger(text: &str) -> bool {
    let lower = text.to_lowercase();
    CREATION_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Finalize a raw decision: drop actions whose signature was already
/// executed, drop denylisted targets, sort by priority descending, cap the
/// batch. Both strategies run through here before returning.
pub fn finalize(mut decision: Decision, page: &PageState, state: &LearningState, cap: usize) -> Decision {
    let before = decision.next_actions.len();
    decision.next_actions.retain(|action: &Action| {
        if state.has_tried(&action.signature(&page.page_key)) {
            return false;
        }
        !is_denylisted(&action.filter_text())
    });
    decision
        .next_actions
        .sort_by(|a, b| b.priority.cmp(&a.priority));
    decision.next_actions.truncate(cap);

    if decision.next_actions.len() != before {
        debug!(
            before,
            after = decision.next_actions.len(),
            page = %page.page_key,
            "filtered action batch"
        );
    }
    decision.sanitize()
}
