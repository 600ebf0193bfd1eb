//! Iteration controller: capture → decide → execute → checkpoint →
//! terminate.
//!
//! The controller owns the session's [`LearningState`] and is its only
//! writer. No error except a fatal driver failure crosses an iteration
//! boundary; everything else is recorded in the error log and the loop
//! keeps going. Termination is checked only between iterations — an
//! in-flight action always runs to completion first.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use action_executor::Executor;
use cdp_driver::Driver;
use decision_policy::filters::is_denylisted;
use decision_policy::DecisionPolicy;
use learning_store::LearningState;
use page_perceiver::{page_key, resolve_href, ElementCategory, PagePerceiver, PageState};
use protection_sentinel::Sentinel;
use sitescout_core_types::{ActionKind, ActionResult, Decision, ExploreError};
use tracing::{error, info, warn};

use crate::config::ExplorerConfig;
use crate::store::RunStore;

/// Queue priority for destinations discovered behind navigation links.
const PENDING_PRIORITY_NAV: i32 = 60;
/// Queue priority for destinations behind ordinary links.
const PENDING_PRIORITY_LINK: i32 = 30;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExploreStatus {
    CoverageReached,
    IterationCapReached,
    Aborted,
}

impl ExploreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExploreStatus::CoverageReached => "coverage_reached",
            ExploreStatus::IterationCapReached => "iteration_cap_reached",
            ExploreStatus::Aborted => "aborted",
        }
    }
}

/// Summary handed back to the caller when a run ends.
#[derive(Debug, Clone)]
pub struct ExploreOutcome {
    pub status: ExploreStatus,
    pub iterations: u32,
    pub pages_discovered: usize,
    pub pages_explored: usize,
    pub features_discovered: usize,
    pub coverage: u8,
    pub report_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// The exploration session driver.
pub struct Explorer {
    driver: Arc<dyn Driver>,
    policy: Box<dyn DecisionPolicy>,
    perceiver: PagePerceiver,
    executor: Executor,
    sentinel: Sentinel,
    store: RunStore,
    config: ExplorerConfig,
    state: LearningState,
    goal: String,

    /// Shortest known link-distance per page identity.
    depths: HashMap<String, u32>,
    last_key: Option<String>,
    same_key_streak: u32,
    force_anchor: bool,
    coverage_reset_pending: bool,
}

impl Explorer {
    pub fn new(
        driver: Arc<dyn Driver>,
        policy: Box<dyn DecisionPolicy>,
        store: RunStore,
        config: ExplorerConfig,
        goal: impl Into<String>,
    ) -> Self {
        let goal = goal.into();
        let executor = Executor::new(driver.clone())
            .with_nav_timeout(config.nav_timeout)
            .with_pacing_ms(config.pacing_ms.0, config.pacing_ms.1);
        Self {
            driver,
            policy,
            perceiver: PagePerceiver::new(),
            executor,
            sentinel: Sentinel::default(),
            store,
            config,
            state: LearningState::new(goal.clone()),
            goal,
            depths: HashMap::new(),
            last_key: None,
            same_key_streak: 0,
            force_anchor: false,
            coverage_reset_pending: false,
        }
    }

    /// Resume from a previously checkpointed state.
    pub fn with_state(mut self, state: LearningState) -> Self {
        self.state = state;
        self
    }

    pub fn with_sentinel(mut self, sentinel: Sentinel) -> Self {
        self.sentinel = sentinel;
        self
    }

    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    pub fn state(&self) -> &LearningState {
        &self.state
    }

    /// Run until coverage crosses the threshold, the iteration cap is hit,
    /// or the driver dies. Login is a precondition supplied by the caller.
    pub async fn run(mut self) -> ExploreOutcome {
        info!(
            anchor = %self.config.anchor_url,
            policy = self.policy.name(),
            goal = %self.goal,
            "exploration session starting"
        );

        if let Err(err) = self
            .driver
            .navigate(&self.config.anchor_url, self.config.nav_timeout)
            .await
        {
            if err.is_fatal() {
                return self.abort(err.into_explore("initial navigation")).await;
            }
            warn!("initial navigation failed, capturing wherever we are: {err}");
        }

        loop {
            let iteration = self.state.next_iteration();
            if iteration > self.config.max_iterations {
                return self.finish(ExploreStatus::IterationCapReached).await;
            }

            match self.iterate(iteration).await {
                Ok(()) => {}
                Err(err) if err.is_fatal() => return self.abort(err).await,
                Err(err) => {
                    self.state.record_error(iteration, "iteration", err.to_string());
                }
            }

            if self.state.estimated_coverage >= self.config.coverage_threshold {
                return self.finish(ExploreStatus::CoverageReached).await;
            }
        }
    }

    async fn iterate(&mut self, iteration: u32) -> Result<(), ExploreError> {
        // Defenses first: a challenge is a pause, never a reset.
        self.sentinel.check_and_wait(self.driver.as_ref()).await?;

        if self.force_anchor {
            info!(anchor = %self.config.anchor_url, "stuck recovery: navigating to anchor");
            self.force_anchor = false;
            self.coverage_reset_pending = true;
            if let Err(err) = self
                .driver
                .navigate(&self.config.anchor_url, self.config.nav_timeout)
                .await
            {
                if err.is_fatal() {
                    return Err(err.into_explore("anchor navigation"));
                }
                self.state
                    .record_error(iteration, "anchor navigation", err.to_string());
            }
        }

        let page = match self.perceiver.capture(self.driver.as_ref()).await {
            Ok(page) => page,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                self.state.record_error(iteration, "capture", err.to_string());
                return Ok(());
            }
        };
        info!(
            iteration,
            page = %page.page_key,
            elements = page.element_count(),
            "page captured"
        );

        let depth = *self.depths.entry(page.page_key.clone()).or_insert(0);
        self.state.record_page(
            &page.page_key,
            &page.url,
            &page.title,
            page.element_count(),
            page.modals().count(),
        );
        self.state.mark_completed(&page.page_key);
        self.enqueue_links(&page, depth);

        let decision = match self.policy.decide(&page, &self.state, &self.goal).await {
            Ok(decision) => decision,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                // Oracle trouble degrades to an empty decision with the goal
                // unchanged; the session keeps moving.
                warn!("decision failed, continuing with empty batch: {err}");
                self.state.record_error(iteration, "decide", err.to_string());
                Decision::empty(&self.goal)
            }
        };

        for feature in &decision.discovered_features {
            self.state.record_feature(feature);
        }
        if !decision.new_goal.trim().is_empty() {
            self.goal = decision.new_goal.clone();
        }
        let coverage = if decision.estimated_coverage > 0 {
            decision.estimated_coverage
        } else {
            self.state.ratio_coverage()
        };
        self.state
            .set_coverage(coverage, self.coverage_reset_pending);
        self.coverage_reset_pending = false;

        self.execute_batch(iteration, &page, &decision).await?;
        self.update_stuck_tracking(iteration, &page).await?;
        self.checkpoint(iteration, Some(&page)).await;
        Ok(())
    }

    async fn execute_batch(
        &mut self,
        iteration: u32,
        page: &PageState,
        decision: &Decision,
    ) -> Result<(), ExploreError> {
        for action in &decision.next_actions {
            let signature = action.signature(&page.page_key);
            if self.state.has_tried(&signature) {
                continue;
            }

            match self.executor.execute(action, page).await {
                Ok(result) => {
                    if let Some(error) = &result.error {
                        self.state
                            .record_error(iteration, action.kind.name(), error.clone());
                    }
                    self.state.record_action(
                        iteration,
                        &page.page_key,
                        action.kind.name(),
                        signature,
                        result,
                    );
                    if action.kind == ActionKind::Navigate {
                        if let Some(url) = action.url.as_deref() {
                            let key = page_key(url);
                            let next_depth = self.depths.get(&page.page_key).copied().unwrap_or(0) + 1;
                            self.depths.entry(key).or_insert(next_depth);
                        }
                        // Navigation-heavy operation: re-check defenses.
                        self.sentinel.check_and_wait(self.driver.as_ref()).await?;
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    if let (ExploreError::NavigationTimeout(_), Some(url)) =
                        (&err, action.url.as_deref())
                    {
                        let key = page_key(url);
                        warn!(page = %key, "target failed twice, skipping it from now on");
                        self.state.mark_failed(&key);
                    }
                    self.state
                        .record_error(iteration, action.kind.name(), err.to_string());
                    self.state.record_action(
                        iteration,
                        &page.page_key,
                        action.kind.name(),
                        signature,
                        ActionResult::failed(err.to_string(), Default::default()),
                    );
                }
            }
        }
        Ok(())
    }

    /// Post-action capture of the resolved page identity. An unchanged
    /// identity across `stuck_window` consecutive captures (once past the
    /// warmup iterations) forces an anchor navigation next iteration —
    /// queues are left untouched.
    async fn update_stuck_tracking(
        &mut self,
        iteration: u32,
        page: &PageState,
    ) -> Result<(), ExploreError> {
        let resolved_key = match self.driver.current_url().await {
            Ok(url) => page_key(&url),
            Err(err) if err.is_fatal() => return Err(err.into_explore("post-action url")),
            Err(_) => page.page_key.clone(),
        };

        if self.last_key.as_deref() == Some(resolved_key.as_str()) {
            self.same_key_streak += 1;
        } else {
            self.same_key_streak = 1;
            self.last_key = Some(resolved_key);
        }

        if self.same_key_streak >= self.config.stuck_window
            && iteration > self.config.stuck_min_iterations
        {
            warn!(
                streak = self.same_key_streak,
                "page identity unchanged, forcing anchor navigation next iteration"
            );
            self.force_anchor = true;
            self.same_key_streak = 0;
        }
        Ok(())
    }

    fn enqueue_links(&mut self, page: &PageState, depth: u32) {
        for link in page.links().filter(|e| e.enabled) {
            let Some(href) = link.href.as_deref() else {
                continue;
            };
            let Some(resolved) = resolve_href(&page.url, href) else {
                continue;
            };
            let key = page_key(&resolved);
            if key == page.page_key {
                continue;
            }
            if is_denylisted(link.label()) || is_denylisted(&resolved) {
                continue;
            }
            let priority = if link.category == ElementCategory::Navigation {
                PENDING_PRIORITY_NAV
            } else {
                PENDING_PRIORITY_LINK
            };
            self.depths.entry(key.clone()).or_insert(depth + 1);
            self.state.mark_pending(&key, &resolved, depth + 1, priority);
        }
    }

    /// Checkpoint under the configured I/O budget; overruns are logged and
    /// the loop moves on.
    async fn checkpoint(&self, iteration: u32, page: Option<&PageState>) {
        let store = self.store.clone();
        let state = self.state.clone();
        let page = page.cloned();
        let write =
            tokio::task::spawn_blocking(move || store.checkpoint(iteration, &state, page.as_ref()));
        match tokio::time::timeout(self.config.persist_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("checkpoint task failed: {err}"),
            Err(_) => warn!(
                "checkpoint exceeded {}ms budget",
                self.config.persist_timeout.as_millis()
            ),
        }
    }

    async fn finish(self, status: ExploreStatus) -> ExploreOutcome {
        info!(status = status.as_str(), "exploration session finished");
        self.flush(status, None).await
    }

    async fn abort(self, err: ExploreError) -> ExploreOutcome {
        error!("aborting run on fatal driver error: {err}");
        if let Ok(shot) = self.driver.screenshot().await {
            self.store.save_diagnostic(&shot);
        }
        self.flush(ExploreStatus::Aborted, Some(err.to_string())).await
    }

    async fn flush(mut self, status: ExploreStatus, error_message: Option<String>) -> ExploreOutcome {
        if let Some(message) = &error_message {
            let iteration = self.state.iteration;
            self.state.record_error(iteration, "session", message.clone());
        }
        self.checkpoint(self.state.iteration, None).await;

        let report_path = match self
            .store
            .write_report(&self.state, status.as_str(), self.policy.name())
        {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("final report write failed: {err}");
                None
            }
        };

        ExploreOutcome {
            status,
            iterations: self.state.iteration,
            pages_discovered: self.state.discovered_pages.len(),
            pages_explored: self.state.pages_explored(),
            features_discovered: self.state.discovered_features.len(),
            coverage: self.state.estimated_coverage,
            report_path,
            error: error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdp_driver::DriverError;
    use parking_lot::Mutex;
    use protection_sentinel::SentinelConfig;
    use serde_json::{json, Value};
    use sitescout_core_types::{Action, ActionTarget, Locator};
    use std::time::Duration;

    /// Single-page scripted driver for controller tests.
    struct FixedPage {
        url: String,
        content: String,
        navigations: Mutex<Vec<String>>,
        clicks: Mutex<Vec<String>>,
    }

    impl FixedPage {
        fn new(url: &str) -> Self {
            Self {
                url: url.to_string(),
                content: "<main>ok</main>".to_string(),
                navigations: Mutex::new(Vec::new()),
                clicks: Mutex::new(Vec::new()),
            }
        }

        fn with_content(mut self, content: &str) -> Self {
            self.content = content.to_string();
            self
        }
    }

    #[async_trait]
    impl Driver for FixedPage {
        async fn navigate(&self, url: &str, _t: Duration) -> Result<(), DriverError> {
            self.navigations.lock().push(url.to_string());
            Ok(())
        }
        async fn evaluate(&self, js: &str) -> Result<Value, DriverError> {
            if js.contains("const out = []") {
                Ok(json!([]))
            } else if js.contains("getBoundingClientRect") {
                Ok(json!({"found": true, "visible": true, "enabled": true}))
            } else {
                Ok(json!(true))
            }
        }
        async fn click_css(&self, selector: &str, _t: Duration) -> Result<(), DriverError> {
            self.clicks.lock().push(selector.to_string());
            Ok(())
        }
        async fn type_css(&self, _s: &str, _x: &str, _t: Duration) -> Result<(), DriverError> {
            Ok(())
        }
        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(self.url.clone())
        }
        async fn title(&self) -> Result<String, DriverError> {
            Ok("Fixed".to_string())
        }
        async fn content(&self) -> Result<String, DriverError> {
            Ok(self.content.clone())
        }
        async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
            Ok(vec![1, 2, 3])
        }
    }

    /// Policy that never proposes anything.
    struct NullPolicy;

    #[async_trait]
    impl DecisionPolicy for NullPolicy {
        async fn decide(
            &self,
            _page: &PageState,
            _state: &LearningState,
            goal: &str,
        ) -> Result<Decision, ExploreError> {
            Ok(Decision::empty(goal))
        }
        fn name(&self) -> &'static str {
            "null"
        }
    }

    /// Policy that reports fixed coverage.
    struct CoveragePolicy(u8);

    #[async_trait]
    impl DecisionPolicy for CoveragePolicy {
        async fn decide(
            &self,
            _page: &PageState,
            _state: &LearningState,
            goal: &str,
        ) -> Result<Decision, ExploreError> {
            Ok(Decision {
                estimated_coverage: self.0,
                ..Decision::empty(goal)
            })
        }
        fn name(&self) -> &'static str {
            "coverage"
        }
    }

    /// Policy that re-proposes the same click every iteration, unfiltered.
    struct RepeatClickPolicy;

    #[async_trait]
    impl DecisionPolicy for RepeatClickPolicy {
        async fn decide(
            &self,
            _page: &PageState,
            _state: &LearningState,
            goal: &str,
        ) -> Result<Decision, ExploreError> {
            Ok(Decision {
                next_actions: vec![Action::click(
                    ActionTarget::from_locators(vec![Locator::css("#same")], Some("Same".into())),
                    50,
                    "repeat",
                )],
                ..Decision::empty(goal)
            })
        }
        fn name(&self) -> &'static str {
            "repeat"
        }
    }

    fn test_config(anchor: &str, max_iterations: u32) -> ExplorerConfig {
        ExplorerConfig::new(anchor)
            .with_max_iterations(max_iterations)
            .with_pacing_ms(0, 0)
    }

    fn quiet_sentinel() -> Sentinel {
        Sentinel::new(SentinelConfig {
            verification_cooldown: Duration::from_millis(5),
            throttle_cooldown: Duration::from_millis(5),
            jitter: 0.0,
        })
    }

    #[tokio::test]
    async fn iteration_cap_terminates_the_loop() {
        let driver = Arc::new(FixedPage::new("https://app.test/board"));
        let dir = tempfile::tempdir().unwrap();
        let explorer = Explorer::new(
            driver,
            Box::new(NullPolicy),
            RunStore::create(dir.path()).unwrap(),
            test_config("https://app.test/board", 3),
            "map the app",
        );

        let outcome = explorer.run().await;
        assert_eq!(outcome.status, ExploreStatus::IterationCapReached);
        assert_eq!(outcome.iterations, 4, "cap checked at the boundary");
        assert!(outcome.report_path.is_some());
    }

    #[tokio::test]
    async fn coverage_threshold_terminates_after_one_iteration() {
        let driver = Arc::new(FixedPage::new("https://app.test/board"));
        let dir = tempfile::tempdir().unwrap();
        let explorer = Explorer::new(
            driver,
            Box::new(CoveragePolicy(96)),
            RunStore::create(dir.path()).unwrap(),
            test_config("https://app.test/board", 40),
            "map the app",
        );

        let outcome = explorer.run().await;
        assert_eq!(outcome.status, ExploreStatus::CoverageReached);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.coverage, 96);
    }

    #[tokio::test]
    async fn unchanged_identity_forces_anchor_navigation() {
        let driver = Arc::new(FixedPage::new("https://app.test/loop"));
        let dir = tempfile::tempdir().unwrap();
        let explorer = Explorer::new(
            driver.clone(),
            Box::new(NullPolicy),
            RunStore::create(dir.path()).unwrap(),
            test_config("https://app.test/board", 8),
            "map the app",
        );

        explorer.run().await;
        let navigations = driver.navigations.lock();
        // Initial navigation plus at least one forced stuck-recovery.
        assert!(
            navigations.len() >= 2,
            "expected a forced anchor navigation, got {navigations:?}"
        );
        assert!(navigations[1..]
            .iter()
            .any(|url| url == "https://app.test/board"));
    }

    #[tokio::test]
    async fn protection_pause_leaves_pending_queue_untouched() {
        let driver = Arc::new(
            FixedPage::new("https://app.test/board")
                .with_content("<div>Too many requests — rate limit hit</div>"),
        );
        let dir = tempfile::tempdir().unwrap();

        let mut seeded = LearningState::new("map the app");
        seeded.mark_pending("app.test/contacts", "https://app.test/contacts", 1, 60);
        let pending_before: Vec<String> = seeded
            .pending_explorations
            .iter()
            .map(|t| t.page_key.clone())
            .collect();

        let explorer = Explorer::new(
            driver,
            Box::new(NullPolicy),
            RunStore::create(dir.path()).unwrap(),
            test_config("https://app.test/board", 2),
            "map the app",
        )
        .with_state(seeded)
        .with_sentinel(quiet_sentinel());

        let outcome = explorer.run().await;
        assert_eq!(outcome.status, ExploreStatus::IterationCapReached);

        let restored =
            LearningState::load(&dir.path().join("learning_state.json")).unwrap();
        let pending_after: Vec<String> = restored
            .pending_explorations
            .iter()
            .map(|t| t.page_key.clone())
            .collect();
        assert_eq!(pending_before, pending_after);
    }

    #[tokio::test]
    async fn repeated_action_signatures_execute_only_once() {
        let driver = Arc::new(FixedPage::new("https://app.test/board"));
        let dir = tempfile::tempdir().unwrap();
        let explorer = Explorer::new(
            driver.clone(),
            Box::new(RepeatClickPolicy),
            RunStore::create(dir.path()).unwrap(),
            test_config("https://app.test/board", 5),
            "map the app",
        );

        explorer.run().await;
        assert_eq!(
            driver.clicks.lock().len(),
            1,
            "same signature must never execute twice"
        );

        let restored =
            LearningState::load(&dir.path().join("learning_state.json")).unwrap();
        let click_entries = restored
            .action_log
            .iter()
            .filter(|e| e.kind == "click")
            .count();
        assert_eq!(click_entries, 1);
    }
}
