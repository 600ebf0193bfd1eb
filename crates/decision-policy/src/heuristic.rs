//! Fixed-priority heuristic strategy.
//!
//! Priority table: unexplored navigation links, then likely creation
//! triggers, then visible forms, then tabs, then the pending queue, then
//! remaining links. Denylist and dedup are applied by the shared finalize
//! pass.

use async_trait::async_trait;
use learning_store::LearningState;
use page_perceiver::{page_key, resolve_href, ElementCategory, PageElement, PageState};
use sitescout_core_types::{Action, ActionTarget, Decision, ExploreError};
use tracing::debug;

use crate::filters::{finalize, looks_like_creation_trigger};
use crate::{DecisionPolicy, DEFAULT_MAX_ACTIONS};

const PRIORITY_NAV: i32 = 80;
const PRIORITY_CREATION: i32 = 60;
const PRIORITY_FORM: i32 = 55;
const PRIORITY_TAB: i32 = 50;
const PRIORITY_PENDING: i32 = 40;
const PRIORITY_LINK: i32 = 20;

/// Heuristic next-action strategy with a fixed priority table.
#[derive(Debug, Clone)]
pub struct HeuristicPolicy {
    max_actions: usize,
}

impl Default for HeuristicPolicy {
    fn default() -> Self {
        Self {
            max_actions: DEFAULT_MAX_ACTIONS,
        }
    }
}

impl HeuristicPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_actions(mut self, max: usize) -> Self {
        self.max_actions = max;
        self
    }

    fn target_of(element: &PageElement) -> ActionTarget {
        ActionTarget::from_locators(
            element.locators.clone(),
            Some(element.label().to_string()).filter(|s| !s.is_empty()),
        )
    }

    /// Whether a link leads to a page this session has not completed.
    fn leads_somewhere_new(page: &PageState, state: &LearningState, element: &PageElement) -> bool {
        match element
            .href
            .as_deref()
            .and_then(|href| resolve_href(&page.url, href))
        {
            Some(resolved) => {
                let key = page_key(&resolved);
                key != page.page_key && !state.completed_explorations.contains(&key)
            }
            None => false,
        }
    }
}

#[async_trait]
impl DecisionPolicy for HeuristicPolicy {
    async fn decide(
        &self,
        page: &PageState,
        state: &LearningState,
        goal: &str,
    ) -> Result<Decision, ExploreError> {
        let mut actions = Vec::new();
        let mut features = Vec::new();

        for link in page.navigation().filter(|e| e.enabled) {
            if Self::leads_somewhere_new(page, state, link) {
                let label = link.label().to_string();
                actions.push(Action::click(
                    Self::target_of(link),
                    PRIORITY_NAV,
                    format!("unexplored navigation link: {label}"),
                ));
                // Nav entries double as feature labels in heuristic runs.
                features.push(label);
            }
        }

        for button in page
            .buttons()
            .filter(|e| e.enabled && looks_like_creation_trigger(e.label()))
        {
            actions.push(Action::click(
                Self::target_of(button),
                PRIORITY_CREATION,
                format!("likely creation trigger: {}", button.label()),
            ));
        }

        for form in page.forms() {
            actions.push(Action::fill_form(
                Self::target_of(form),
                PRIORITY_FORM,
                "visible form to exercise",
            ));
        }

        for tab in page.tabs().filter(|e| e.enabled) {
            actions.push(Action::switch_tab(
                Self::target_of(tab),
                PRIORITY_TAB,
                format!("unvisited tab: {}", tab.label()),
            ));
        }

        if let Some(pending) = state.peek_pending() {
            if pending.page_key != page.page_key {
                actions.push(Action::navigate(
                    pending.url.clone(),
                    PRIORITY_PENDING,
                    format!("queued exploration target (depth {})", pending.depth),
                ));
            }
        }

        for link in page
            .of_category(ElementCategory::Link)
            .filter(|e| e.enabled)
        {
            if Self::leads_somewhere_new(page, state, link) {
                actions.push(Action::click(
                    Self::target_of(link),
                    PRIORITY_LINK,
                    format!("secondary link: {}", link.label()),
                ));
            }
        }

        debug!(
            page = %page.page_key,
            candidates = actions.len(),
            "heuristic candidates assembled"
        );

        let decision = Decision {
            analysis: format!(
                "{} interactive elements on {}; {} pending targets queued",
                page.element_count(),
                page.page_key,
                state.pending_explorations.len()
            ),
            next_actions: actions,
            discovered_features: features,
            new_goal: goal.to_string(),
            estimated_coverage: state.ratio_coverage(),
        };
        Ok(finalize(decision, page, state, self.max_actions))
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescout_core_types::{ActionKind, Locator};

    fn element(
        category: ElementCategory,
        text: &str,
        css: &str,
        href: Option<&str>,
    ) -> PageElement {
        PageElement {
            category,
            tag: "a".into(),
            text: text.into(),
            name: None,
            placeholder: None,
            aria_label: None,
            input_type: None,
            label_text: None,
            href: href.map(str::to_string),
            visible: true,
            enabled: true,
            checked: None,
            options: Vec::new(),
            form_index: None,
            group: None,
            locators: vec![Locator::css(css), Locator::path(format!("main > {css}"))],
        }
    }

    fn board_page(elements: Vec<PageElement>) -> PageState {
        PageState::new("https://app.test/board", "Board", elements)
    }

    #[tokio::test]
    async fn nav_links_outrank_creation_triggers_and_tabs() {
        let page = board_page(vec![
            element(ElementCategory::Tab, "Archived", "#tab-archived", None),
            element(
                ElementCategory::Button,
                "Add Contact",
                "#add-contact",
                None,
            ),
            element(
                ElementCategory::Navigation,
                "Interviews",
                "#nav-interviews",
                Some("/interviews"),
            ),
        ]);
        let state = LearningState::new("map the app");
        let decision = HeuristicPolicy::new()
            .decide(&page, &state, "map the app")
            .await
            .unwrap();

        assert_eq!(
            decision.next_actions[0].target.text.as_deref(),
            Some("Interviews")
        );
        assert_eq!(decision.next_actions[0].priority, PRIORITY_NAV);
        assert!(decision
            .discovered_features
            .contains(&"Interviews".to_string()));
    }

    #[tokio::test]
    async fn completed_destinations_are_not_reproposed() {
        let page = board_page(vec![element(
            ElementCategory::Navigation,
            "Interviews",
            "#nav-interviews",
            Some("/interviews"),
        )]);
        let mut state = LearningState::new("goal");
        state.mark_completed("app.test/interviews");

        let decision = HeuristicPolicy::new()
            .decide(&page, &state, "goal")
            .await
            .unwrap();
        assert!(decision.next_actions.is_empty());
    }

    #[tokio::test]
    async fn pending_queue_supplies_navigation_when_page_is_exhausted() {
        let page = board_page(Vec::new());
        let mut state = LearningState::new("goal");
        state.mark_pending("app.test/documents", "https://app.test/documents", 2, 40);

        let decision = HeuristicPolicy::new()
            .decide(&page, &state, "goal")
            .await
            .unwrap();
        assert_eq!(decision.next_actions.len(), 1);
        assert_eq!(decision.next_actions[0].kind, ActionKind::Navigate);
        assert_eq!(
            decision.next_actions[0].url.as_deref(),
            Some("https://app.test/documents")
        );
    }

    #[tokio::test]
    async fn denylisted_nav_links_never_surface() {
        let page = board_page(vec![element(
            ElementCategory::Navigation,
            "Upgrade to Pro",
            "#nav-upgrade",
            Some("/upgrade"),
        )]);
        let state = LearningState::new("goal");
        let decision = HeuristicPolicy::new()
            .decide(&page, &state, "goal")
            .await
            .unwrap();
        assert!(decision.next_actions.is_empty());
    }

    #[tokio::test]
    async fn goal_is_carried_forward_unchanged() {
        let page = board_page(Vec::new());
        let state = LearningState::new("goal");
        let decision = HeuristicPolicy::new()
            .decide(&page, &state, "map every feature")
            .await
            .unwrap();
        assert_eq!(decision.new_goal, "map every feature");
    }
}
