//! Action and decision data model.
//!
//! A [`Decision`] is what a decision policy hands the iteration controller:
//! an ordered batch of [`Action`]s plus the policy's running commentary. An
//! [`ActionResult`] is what the executor hands back per action. Shapes are
//! serde-validated because the oracle-backed policy deserializes them from
//! an external service.

use serde::{Deserialize, Serialize};

use crate::locator::Locator;

/// Supported action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    FillForm,
    SwitchTab,
    Scroll,
    Wait,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::FillForm => "fill_form",
            ActionKind::SwitchTab => "switch_tab",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
        }
    }
}

/// Element target for an action: the primary locator, declared fallbacks,
/// and the captured visible text used for the last-resort match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionTarget {
    /// Primary locator, tried first.
    pub locator: Option<Locator>,

    /// Fallback locators in declared order.
    #[serde(default)]
    pub fallbacks: Vec<Locator>,

    /// Visible text of the element at capture time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ActionTarget {
    pub fn from_locators(locators: Vec<Locator>, text: Option<String>) -> Self {
        let mut iter = locators.into_iter();
        Self {
            locator: iter.next(),
            fallbacks: iter.collect(),
            text,
        }
    }

    /// All locators in resolution order.
    pub fn chain(&self) -> impl Iterator<Item = &Locator> {
        self.locator.iter().chain(self.fallbacks.iter())
    }

    /// Signature of the primary locator, falling back to the text locator
    /// shape so targetless cosmetic variants still dedup.
    pub fn signature(&self) -> String {
        if let Some(locator) = &self.locator {
            locator.signature()
        } else if let Some(text) = &self.text {
            Locator::text(text.clone()).signature()
        } else {
            "none".to_string()
        }
    }
}

/// One prioritized step a decision policy wants executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,

    /// Element target for element-directed kinds.
    #[serde(default)]
    pub target: ActionTarget,

    /// Destination for `navigate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Higher runs first within a batch.
    #[serde(default)]
    pub priority: i32,

    /// Free-text reason the policy chose this action.
    #[serde(default)]
    pub rationale: String,
}

impl Action {
    pub fn navigate(url: impl Into<String>, priority: i32, rationale: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Navigate,
            target: ActionTarget::default(),
            url: Some(url.into()),
            priority,
            rationale: rationale.into(),
        }
    }

    pub fn click(target: ActionTarget, priority: i32, rationale: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Click,
            target,
            url: None,
            priority,
            rationale: rationale.into(),
        }
    }

    pub fn fill_form(target: ActionTarget, priority: i32, rationale: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::FillForm,
            target,
            url: None,
            priority,
            rationale: rationale.into(),
        }
    }

    pub fn switch_tab(target: ActionTarget, priority: i32, rationale: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::SwitchTab,
            target,
            url: None,
            priority,
            rationale: rationale.into(),
        }
    }

    /// Dedup signature: `(page identity, locator signature, kind)`.
    ///
    /// No action signature is ever executed twice in a session.
    pub fn signature(&self, page_key: &str) -> ActionSignature {
        let locator_sig = match (&self.kind, &self.url) {
            (ActionKind::Navigate, Some(url)) => format!("url:{}", url),
            _ => self.target.signature(),
        };
        ActionSignature(format!("{}|{}|{}", page_key, locator_sig, self.kind.name()))
    }

    /// Text the denylist filter inspects: target value plus captured label.
    pub fn filter_text(&self) -> String {
        let mut parts = Vec::new();
        if let Some(locator) = &self.target.locator {
            parts.push(locator.value.clone());
        }
        if let Some(text) = &self.target.text {
            parts.push(text.clone());
        }
        if let Some(url) = &self.url {
            parts.push(url.clone());
        }
        parts.join(" ").to_lowercase()
    }
}

/// Normalized `(page, locator, kind)` triple used for dedup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionSignature(pub String);

impl std::fmt::Display for ActionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Details reported alongside an action outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionDetails {
    /// Locator strategy that actually resolved the element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// URL after the action settled, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resulting_url: Option<String>,

    /// Form fields filled by a `fill_form` action.
    #[serde(default)]
    pub fields_filled: u32,

    /// Whether a continuation control was found (and eventually enabled).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_btn_found: Option<bool>,
}

/// Outcome of executing one action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub details: ActionDetails,
}

impl ActionResult {
    pub fn ok(details: ActionDetails) -> Self {
        Self {
            success: true,
            error: None,
            details,
        }
    }

    pub fn failed(error: impl Into<String>, details: ActionDetails) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            details,
        }
    }
}

/// A decision policy's output for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Free-text analysis of the current page.
    #[serde(default)]
    pub analysis: String,

    /// Ordered actions to attempt this iteration.
    #[serde(default)]
    pub next_actions: Vec<Action>,

    /// Feature labels discovered on this page.
    #[serde(default)]
    pub discovered_features: Vec<String>,

    /// Updated exploration goal.
    #[serde(default)]
    pub new_goal: String,

    /// Self-reported completeness, 0-100.
    #[serde(default)]
    pub estimated_coverage: u8,
}

impl Decision {
    /// Fallback decision: no actions, goal carried forward unchanged.
    /// Used whenever an oracle response fails to parse or validate.
    pub fn empty(goal: impl Into<String>) -> Self {
        Self {
            analysis: String::new(),
            next_actions: Vec::new(),
            discovered_features: Vec::new(),
            new_goal: goal.into(),
            estimated_coverage: 0,
        }
    }

    /// Clamp out-of-range fields after deserializing external input.
    pub fn sanitize(mut self) -> Self {
        if self.estimated_coverage > 100 {
            self.estimated_coverage = 100;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigate_signature_keys_on_url() {
        let a = Action::navigate("https://app.test/contacts", 50, "unexplored page");
        let sig = a.signature("app.test/board");
        assert_eq!(
            sig.0,
            "app.test/board|url:https://app.test/contacts|navigate"
        );
    }

    #[test]
    fn click_signature_uses_primary_locator() {
        let target = ActionTarget::from_locators(
            vec![Locator::css("#new-job"), Locator::text("New Job")],
            Some("New Job".into()),
        );
        let a = Action::click(target, 60, "creation trigger");
        assert_eq!(a.signature("app.test/board").0, "app.test/board|css:#new-job|click");
    }

    #[test]
    fn same_element_different_kind_has_distinct_signature() {
        let target = ActionTarget::from_locators(vec![Locator::css("#form")], None);
        let click = Action::click(target.clone(), 0, "");
        let fill = Action::fill_form(target, 0, "");
        assert_ne!(click.signature("p").0, fill.signature("p").0);
    }

    #[test]
    fn decision_sanitize_clamps_coverage() {
        let d = Decision {
            estimated_coverage: 250,
            ..Decision::empty("map the app")
        };
        assert_eq!(d.sanitize().estimated_coverage, 100);
    }

    #[test]
    fn action_deserializes_with_type_tag() {
        let json = r##"{"type":"click","priority":70,"rationale":"nav link",
                       "target":{"locator":{"strategy":"css","value":"#contacts"}}}"##;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(action.kind, ActionKind::Click);
        assert_eq!(action.priority, 70);
    }
}
