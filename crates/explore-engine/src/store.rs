//! Run-scoped persistence: per-iteration snapshots, cumulative indexes,
//! and the final human-readable report.
//!
//! Write failures are logged and swallowed — losing one checkpoint must
//! never take the session down with it.

use std::fs;
use std::path::{Path, PathBuf};

use learning_store::LearningState;
use page_perceiver::PageState;
use serde::Serialize;
use sitescout_core_types::ExploreError;
use tracing::{debug, warn};

/// File layout inside one run directory:
/// `learning_state.json`, `discovered_pages.json`, `action_log.json`,
/// `error_log.json`, `page_state_NNN.json`, `report.md`, `diagnostic.png`.
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    /// Create (or reuse) a run directory.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, ExploreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| ExploreError::persistence(format!("create {}: {err}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("learning_state.json")
    }

    /// Persist everything learned so far plus the latest page snapshot.
    /// Individual write failures are logged, never propagated.
    pub fn checkpoint(&self, iteration: u32, state: &LearningState, page: Option<&PageState>) {
        if let Err(err) = state.save(&self.state_path()) {
            warn!("checkpoint: learning state write failed: {err}");
        }
        if let Some(page) = page {
            let name = format!("page_state_{iteration:03}.json");
            self.write_json(&name, page);
        }
        self.write_json("discovered_pages.json", &state.discovered_pages);
        self.write_json("action_log.json", &state.action_log);
        self.write_json("error_log.json", &state.execution_errors);
        debug!(iteration, dir = %self.dir.display(), "checkpoint written");
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) {
        let path = self.dir.join(name);
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&path, bytes) {
                    warn!("checkpoint: {} write failed: {err}", path.display());
                }
            }
            Err(err) => warn!("checkpoint: {} encode failed: {err}", path.display()),
        }
    }

    /// Diagnostic capture written on fatal aborts.
    pub fn save_diagnostic(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let path = self.dir.join("diagnostic.png");
        if let Err(err) = fs::write(&path, bytes) {
            warn!("diagnostic capture write failed: {err}");
        }
    }

    /// Render and write the final human-readable summary.
    pub fn write_report(
        &self,
        state: &LearningState,
        status: &str,
        policy: &str,
    ) -> Result<PathBuf, ExploreError> {
        let path = self.dir.join("report.md");
        let report = render_report(state, status, policy);
        fs::write(&path, report)
            .map_err(|err| ExploreError::persistence(format!("report write: {err}")))?;
        Ok(path)
    }
}

fn render_report(state: &LearningState, status: &str, policy: &str) -> String {
    let mut out = String::new();
    out.push_str("# Exploration report\n\n");
    out.push_str(&format!("- Session: {}\n", state.session_id));
    out.push_str(&format!("- Goal: {}\n", state.goal));
    out.push_str(&format!("- Policy: {policy}\n"));
    out.push_str(&format!("- Status: {status}\n"));
    out.push_str(&format!("- Iterations: {}\n", state.iteration));
    out.push_str(&format!(
        "- Pages discovered: {} (explored: {})\n",
        state.discovered_pages.len(),
        state.pages_explored()
    ));
    out.push_str(&format!("- Modals captured: {}\n", state.modals_captured()));
    out.push_str(&format!(
        "- Features discovered: {}\n",
        state.discovered_features.len()
    ));
    out.push_str(&format!(
        "- Coverage estimate: {}%\n",
        state.estimated_coverage
    ));

    if !state.discovered_features.is_empty() {
        out.push_str("\n## Features\n\n");
        for feature in &state.discovered_features {
            out.push_str(&format!("- {feature}\n"));
        }
    }

    out.push_str("\n## Pages\n\n");
    for page in state.discovered_pages.values() {
        let marker = if page.failed {
            "failed"
        } else if page.explored {
            "explored"
        } else {
            "pending"
        };
        out.push_str(&format!("- `{}` ({marker}) — {}\n", page.page_key, page.title));
    }

    out.push_str("\n## Errors\n\n");
    if state.execution_errors.is_empty() {
        out.push_str("None recorded.\n");
    } else {
        for entry in &state.execution_errors {
            out.push_str(&format!(
                "- [{}] iteration {} — {}: {}\n",
                entry.at.format("%Y-%m-%d %H:%M:%S"),
                entry.iteration,
                entry.context,
                entry.message
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_writes_the_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::create(dir.path().join("run")).unwrap();

        let mut state = LearningState::new("map the app");
        state.mark_pending("app.test/contacts", "https://app.test/contacts", 1, 60);
        let page = PageState::new("https://app.test/board", "Board", Vec::new());

        store.checkpoint(1, &state, Some(&page));

        for file in [
            "learning_state.json",
            "discovered_pages.json",
            "action_log.json",
            "error_log.json",
            "page_state_001.json",
        ] {
            assert!(store.dir().join(file).exists(), "{file} missing");
        }
    }

    #[test]
    fn report_carries_counts_features_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::create(dir.path()).unwrap();

        let mut state = LearningState::new("map the app");
        state.record_page("app.test/board", "https://app.test/board", "Board", 12, 1);
        state.mark_completed("app.test/board");
        state.record_feature("Kanban board");
        state.record_error(3, "click css:#x", "locator not found");
        state.set_coverage(42, false);

        let path = store.write_report(&state, "iteration_cap_reached", "heuristic").unwrap();
        let report = fs::read_to_string(path).unwrap();
        assert!(report.contains("Pages discovered: 1 (explored: 1)"));
        assert!(report.contains("Modals captured: 1"));
        assert!(report.contains("Kanban board"));
        assert!(report.contains("locator not found"));
        assert!(report.contains("Coverage estimate: 42%"));
    }

    #[test]
    fn checkpoint_survives_an_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::create(dir.path().join("run")).unwrap();
        // Remove the directory out from under the store; writes must only log.
        fs::remove_dir_all(store.dir()).unwrap();

        let state = LearningState::new("goal");
        store.checkpoint(1, &state, None);
    }
}
