//! Session learning state: the exploration engine's persistent memory.
//!
//! One [`LearningState`] is constructed per session and threaded explicitly
//! through the iteration controller — no module-level state, exactly one
//! writer. Every mutator is synchronous and idempotent with respect to
//! already-recorded identities, and `load`/`save` give crash recovery: a
//! reloaded state always satisfies the pending/completed disjointness
//! invariant, even if the file on disk was hand-edited.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitescout_core_types::{ActionResult, ActionSignature, ExploreError, SessionId};
use tracing::{debug, info};

/// Metadata about a discovered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_key: String,
    pub url: String,
    pub title: String,
    pub first_seen: DateTime<Utc>,
    pub explored: bool,
    /// Marked when navigation to this page failed twice.
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub element_count: usize,
    #[serde(default)]
    pub modal_count: usize,
}

/// A queued, not-yet-visited exploration target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTarget {
    pub page_key: String,
    pub url: String,
    pub depth: u32,
    pub priority: i32,
    /// Insertion order tiebreaker.
    pub seq: u64,
}

/// One executed action, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub at: DateTime<Utc>,
    pub iteration: u32,
    pub page_key: String,
    pub kind: String,
    pub signature: ActionSignature,
    pub result: ActionResult,
}

/// One recorded failure, append-only, timestamped with action context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub at: DateTime<Utc>,
    pub iteration: u32,
    pub context: String,
    pub message: String,
}

/// The session's single mutable aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningState {
    pub session_id: SessionId,
    pub goal: String,
    pub started_at: DateTime<Utc>,
    pub iteration: u32,
    pub estimated_coverage: u8,

    pub discovered_pages: BTreeMap<String, PageRecord>,
    pub pending_explorations: Vec<PendingTarget>,
    pub completed_explorations: BTreeSet<String>,
    pub explored_interactions: BTreeSet<String>,
    pub discovered_features: BTreeSet<String>,

    pub action_log: Vec<ActionLogEntry>,
    pub execution_errors: Vec<ErrorLogEntry>,

    next_seq: u64,
}

impl LearningState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(),
            goal: goal.into(),
            started_at: Utc::now(),
            iteration: 0,
            estimated_coverage: 0,
            discovered_pages: BTreeMap::new(),
            pending_explorations: Vec::new(),
            completed_explorations: BTreeSet::new(),
            explored_interactions: BTreeSet::new(),
            discovered_features: BTreeSet::new(),
            action_log: Vec::new(),
            execution_errors: Vec::new(),
            next_seq: 0,
        }
    }

    /// Record a page sighting. Re-recording updates counts but never clears
    /// the explored flag.
    pub fn record_page(
        &mut self,
        page_key: &str,
        url: &str,
        title: &str,
        element_count: usize,
        modal_count: usize,
    ) {
        let entry = self
            .discovered_pages
            .entry(page_key.to_string())
            .or_insert_with(|| PageRecord {
                page_key: page_key.to_string(),
                url: url.to_string(),
                title: title.to_string(),
                first_seen: Utc::now(),
                explored: false,
                failed: false,
                element_count: 0,
                modal_count: 0,
            });
        entry.element_count = entry.element_count.max(element_count);
        entry.modal_count = entry.modal_count.max(modal_count);
        if !title.is_empty() {
            entry.title = title.to_string();
        }
    }

    /// Queue a target for exploration. No-op when the page is already
    /// completed, already queued, or previously failed.
    pub fn mark_pending(&mut self, page_key: &str, url: &str, depth: u32, priority: i32) {
        if self.completed_explorations.contains(page_key) {
            return;
        }
        if self.pending_explorations.iter().any(|t| t.page_key == page_key) {
            return;
        }
        if self
            .discovered_pages
            .get(page_key)
            .map(|p| p.failed)
            .unwrap_or(false)
        {
            return;
        }
        debug!(page_key, priority, depth, "queued exploration target");
        self.pending_explorations.push(PendingTarget {
            page_key: page_key.to_string(),
            url: url.to_string(),
            depth,
            priority,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.record_page(page_key, url, "", 0, 0);
    }

    /// Mark a page visited: removed from pending, added to completed.
    /// Idempotent — completing a completed page is a no-op.
    pub fn mark_completed(&mut self, page_key: &str) {
        self.pending_explorations.retain(|t| t.page_key != page_key);
        if self.completed_explorations.insert(page_key.to_string()) {
            if let Some(page) = self.discovered_pages.get_mut(page_key) {
                page.explored = true;
            }
        }
    }

    /// Mark a page as unreachable so it is skipped, not retried forever.
    pub fn mark_failed(&mut self, page_key: &str) {
        self.pending_explorations.retain(|t| t.page_key != page_key);
        if let Some(page) = self.discovered_pages.get_mut(page_key) {
            page.failed = true;
        }
    }

    /// The highest-priority queued target, without removing it.
    pub fn peek_pending(&self) -> Option<&PendingTarget> {
        self.pending_explorations.iter().min_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.depth.cmp(&b.depth))
                .then(a.seq.cmp(&b.seq))
        })
    }

    /// Whether an action signature has been executed before.
    pub fn has_tried(&self, signature: &ActionSignature) -> bool {
        self.explored_interactions.contains(&signature.0)
    }

    /// Record an executed action and its outcome. The signature set is what
    /// enforces the never-twice invariant; the log is append-only history.
    pub fn record_action(
        &mut self,
        iteration: u32,
        page_key: &str,
        kind: &str,
        signature: ActionSignature,
        result: ActionResult,
    ) {
        self.explored_interactions.insert(signature.0.clone());
        self.action_log.push(ActionLogEntry {
            at: Utc::now(),
            iteration,
            page_key: page_key.to_string(),
            kind: kind.to_string(),
            signature,
            result,
        });
    }

    /// Record a discovered feature label. Idempotent.
    pub fn record_feature(&mut self, label: impl Into<String>) {
        let label = label.into();
        let trimmed = label.trim();
        if !trimmed.is_empty() && self.discovered_features.insert(trimmed.to_string()) {
            info!(feature = trimmed, "discovered feature");
        }
    }

    pub fn record_error(&mut self, iteration: u32, context: &str, message: impl Into<String>) {
        self.execution_errors.push(ErrorLogEntry {
            at: Utc::now(),
            iteration,
            context: context.to_string(),
            message: message.into(),
        });
    }

    /// Advance and return the iteration counter.
    pub fn next_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    /// Update the coverage estimate. Monotonic unless `after_reset` — a
    /// forced stuck-reset is the one place coverage may dip.
    pub fn set_coverage(&mut self, value: u8, after_reset: bool) {
        let value = value.min(100);
        if after_reset || value > self.estimated_coverage {
            self.estimated_coverage = value;
        }
    }

    /// Heuristic completeness estimate from the explored/discovered ratio,
    /// used when no oracle supplies one.
    pub fn ratio_coverage(&self) -> u8 {
        let done = self.completed_explorations.len();
        let total = done + self.pending_explorations.len() + 1;
        ((done * 100) / total).min(100) as u8
    }

    pub fn pages_explored(&self) -> usize {
        self.completed_explorations.len()
    }

    pub fn modals_captured(&self) -> usize {
        self.discovered_pages.values().map(|p| p.modal_count).sum()
    }

    // --- persistence ---

    /// Serialize to `path` atomically (tmp file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), ExploreError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|err| ExploreError::persistence(format!("encode state: {err}")))?;
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)
            .map_err(|err| ExploreError::persistence(format!("create {}: {err}", tmp.display())))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|err| ExploreError::persistence(format!("write state: {err}")))?;
        fs::rename(&tmp, path)
            .map_err(|err| ExploreError::persistence(format!("rename state: {err}")))?;
        Ok(())
    }

    /// Load from `path`, re-establishing invariants defensively: pending
    /// entries for completed or failed pages are dropped, duplicates
    /// collapsed.
    pub fn load(path: &Path) -> Result<Self, ExploreError> {
        let bytes = fs::read(path)
            .map_err(|err| ExploreError::persistence(format!("read {}: {err}", path.display())))?;
        let mut state: LearningState = serde_json::from_slice(&bytes)
            .map_err(|err| ExploreError::persistence(format!("decode state: {err}")))?;

        let mut seen = BTreeSet::new();
        let completed = state.completed_explorations.clone();
        let failed: BTreeSet<String> = state
            .discovered_pages
            .values()
            .filter(|p| p.failed)
            .map(|p| p.page_key.clone())
            .collect();
        state.pending_explorations.retain(|t| {
            !completed.contains(&t.page_key)
                && !failed.contains(&t.page_key)
                && seen.insert(t.page_key.clone())
        });
        state.next_seq = state
            .pending_explorations
            .iter()
            .map(|t| t.seq + 1)
            .max()
            .unwrap_or(state.next_seq);
        info!(
            pages = state.discovered_pages.len(),
            pending = state.pending_explorations.len(),
            iteration = state.iteration,
            "restored learning state"
        );
        Ok(state)
    }
}
