//! Form filling: field-kind classification, value synthesis, group
//! handling, and flow continuation.
//!
//! Field-kind detection is a best-effort substring classifier over the
//! element's semantic hints; it is not expected to generalize beyond the
//! patterns enumerated here.

use std::collections::BTreeSet;

use page_perceiver::{ElementCategory, PageElement, PageState};
use sitescout_core_types::{Action, ActionDetails, ActionResult, ExploreError, LocatorStrategy};
use tracing::{debug, warn};

use crate::{js_str, Executor};

/// Labels that identify a flow-advancing control.
pub const CONTINUE_PATTERNS: &[&str] = &["continue", "next", "submit", "save", "finish", "done"];

/// Option labels that mark a "blank / start from scratch" choice within a
/// mutually exclusive group.
const START_BLANK_PATTERNS: &[&str] = &["start from scratch", "from scratch", "blank", "empty"];

/// Select option labels that are placeholders, not real choices.
const PLACEHOLDER_OPTION_PATTERNS: &[&str] = &["select", "choose", "pick", "--"];

/// Field kinds recognized by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Email,
    Phone,
    Date,
    Number,
    Url,
    Name,
    FreeText,
}

/// Classify a free-text field from its input type and semantic hints.
pub fn classify_field(element: &PageElement) -> FieldKind {
    match element.input_type.as_deref() {
        Some("email") => return FieldKind::Email,
        Some("tel") => return FieldKind::Phone,
        Some("date" | "datetime-local") => return FieldKind::Date,
        Some("number") => return FieldKind::Number,
        Some("url") => return FieldKind::Url,
        _ => {}
    }
    let hints = element.semantic_hints();
    if hints.contains("email") || hints.contains("e-mail") {
        FieldKind::Email
    } else if hints.contains("phone") || hints.contains("mobile") {
        FieldKind::Phone
    } else if hints.contains("date") || hints.contains("birth") || hints.contains("deadline") {
        FieldKind::Date
    } else if hints.contains("salary")
        || hints.contains("amount")
        || hints.contains("years")
        || hints.contains("number")
    {
        FieldKind::Number
    } else if hints.contains("url")
        || hints.contains("website")
        || hints.contains("linkedin")
        || hints.contains("portfolio")
    {
        FieldKind::Url
    } else if hints.contains("name") {
        FieldKind::Name
    } else {
        FieldKind::FreeText
    }
}

/// Shaped sample value for a field kind.
pub fn sample_value(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Email => "alex.morgan@example.com",
        FieldKind::Phone => "+1 555 014 2368",
        FieldKind::Date => "2024-05-14",
        FieldKind::Number => "3",
        FieldKind::Url => "https://example.com/profile",
        FieldKind::Name => "Alex Morgan",
        FieldKind::FreeText => "Sample entry from guided walkthrough",
    }
}

fn matches_any(text: &str, patterns: &[&str]) -> bool {
    let lower = text.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

/// First concrete selector for a field (css preferred, then path).
fn field_selector(element: &PageElement) -> Option<&str> {
    element
        .locators
        .iter()
        .find(|l| matches!(l.strategy, LocatorStrategy::Css | LocatorStrategy::Path))
        .map(|l| l.value.as_str())
}

fn is_fillable(element: &PageElement) -> bool {
    element.enabled
        && matches!(
            element.category,
            ElementCategory::Input
                | ElementCategory::Select
                | ElementCategory::Checkbox
                | ElementCategory::Radio
                | ElementCategory::Toggle
        )
}

impl Executor {
    pub(crate) async fn fill_form(
        &self,
        action: &Action,
        page: &PageState,
    ) -> Result<ActionResult, ExploreError> {
        let form_index = find_form_index(action, page);
        let fields: Vec<&PageElement> = page
            .elements
            .iter()
            .filter(|e| is_fillable(e))
            .filter(|e| form_index.is_none() || e.form_index == form_index)
            .collect();

        if fields.is_empty() {
            return Ok(ActionResult::failed(
                "no fillable fields in scope",
                ActionDetails {
                    method: Some("fill_form".into()),
                    ..Default::default()
                },
            ));
        }

        let mut filled = 0u32;
        let mut handled_groups: BTreeSet<String> = BTreeSet::new();

        for field in &fields {
            let done = match field.category {
                ElementCategory::Input => self.fill_text_field(field).await?,
                ElementCategory::Select => self.choose_select_option(field).await?,
                ElementCategory::Radio => {
                    self.pick_group_option(field, &fields, &mut handled_groups)
                        .await?
                }
                ElementCategory::Checkbox => {
                    if group_size(field, &fields) >= 2 {
                        self.pick_group_option(field, &fields, &mut handled_groups)
                            .await?
                    } else {
                        self.flip_toggle_if_off(field).await?
                    }
                }
                ElementCategory::Toggle => self.flip_toggle_if_off(field).await?,
                _ => false,
            };
            if done {
                filled += 1;
            }
        }

        let (continue_found, continue_error) = self.advance_flow(form_index, page).await?;

        let details = ActionDetails {
            method: Some("fill_form".into()),
            resulting_url: self.driver().current_url().await.ok(),
            fields_filled: filled,
            continue_btn_found: Some(continue_found),
        };
        Ok(match continue_error {
            Some(error) => ActionResult::failed(error, details),
            None if filled == 0 && !continue_found => {
                ActionResult::failed("no field accepted input", details)
            }
            None => ActionResult::ok(details),
        })
    }

    async fn fill_text_field(&self, field: &PageElement) -> Result<bool, ExploreError> {
        let Some(selector) = field_selector(field) else {
            return Ok(false);
        };
        let kind = classify_field(field);
        let value = sample_value(kind);

        // Date controls reject synthetic keystrokes; set them directly.
        let outcome = if kind == FieldKind::Date {
            self.set_value_js(selector, value).await
        } else {
            match self
                .driver()
                .type_css(selector, value, std::time::Duration::from_secs(5))
                .await
            {
                Ok(()) => Ok(true),
                Err(err) if err.is_fatal() => return Err(err.into_explore("type")),
                Err(err) => {
                    debug!(selector, "typing failed: {err}");
                    Ok(false)
                }
            }
        }?;
        Ok(outcome)
    }

    async fn choose_select_option(&self, field: &PageElement) -> Result<bool, ExploreError> {
        let Some(selector) = field_selector(field) else {
            return Ok(false);
        };
        let Some(option) = field.options.iter().find(|o| {
            !o.disabled && !o.value.is_empty() && !matches_any(&o.text, PLACEHOLDER_OPTION_PATTERNS)
        }) else {
            debug!(selector, "select has no real options");
            return Ok(false);
        };

        let js = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.value = {val};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#,
            sel = js_str(selector),
            val = js_str(&option.value)
        );
        self.eval_bool(&js, "select option").await
    }

    /// Select one option of a mutually exclusive group: the blank /
    /// start-from-scratch option when one exists, otherwise the first
    /// enabled member. The group is handled once per fill pass.
    async fn pick_group_option(
        &self,
        field: &PageElement,
        fields: &[&PageElement],
        handled: &mut BTreeSet<String>,
    ) -> Result<bool, ExploreError> {
        let group_key = field
            .group
            .clone()
            .unwrap_or_else(|| format!("__ungrouped:{:?}", field_selector(field)));
        if !handled.insert(group_key) {
            return Ok(false);
        }

        let members: Vec<&&PageElement> = fields
            .iter()
            .filter(|e| e.category == field.category && e.group == field.group)
            .collect();
        let choice = members
            .iter()
            .find(|e| matches_any(e.label(), START_BLANK_PATTERNS) && e.enabled)
            .or_else(|| members.iter().find(|e| e.enabled));
        let Some(choice) = choice else {
            return Ok(false);
        };
        let Some(selector) = field_selector(choice) else {
            return Ok(false);
        };

        match self
            .driver()
            .click_css(selector, std::time::Duration::from_secs(5))
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if err.is_fatal() => Err(err.into_explore("group option")),
            Err(err) => {
                debug!(selector, "group option click failed: {err}");
                Ok(false)
            }
        }
    }

    /// Flip a toggle only when it is currently off.
    async fn flip_toggle_if_off(&self, field: &PageElement) -> Result<bool, ExploreError> {
        if field.checked == Some(true) {
            return Ok(false);
        }
        let Some(selector) = field_selector(field) else {
            return Ok(false);
        };
        match self
            .driver()
            .click_css(selector, std::time::Duration::from_secs(5))
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if err.is_fatal() => Err(err.into_explore("toggle")),
            Err(err) => {
                debug!(selector, "toggle click failed: {err}");
                Ok(false)
            }
        }
    }

    /// Locate a continuation control and advance the flow. A disabled
    /// control is polled with the shared backoff budget to ride out async
    /// form validation. Returns `(continue_btn_found, error)`.
    async fn advance_flow(
        &self,
        form_index: Option<u32>,
        page: &PageState,
    ) -> Result<(bool, Option<String>), ExploreError> {
        let control = page
            .buttons()
            .filter(|b| form_index.is_none() || b.form_index == form_index || b.form_index.is_none())
            .find(|b| matches_any(b.label(), CONTINUE_PATTERNS));
        let Some(control) = control else {
            return Ok((false, None));
        };
        let Some(selector) = field_selector(control) else {
            return Ok((false, None));
        };

        let mut attempt = 0u32;
        loop {
            let enabled = self
                .eval_bool(
                    &format!(
                        r#"(() => {{
  const el = document.querySelector({sel});
  return !!el && !(el.disabled || el.getAttribute('aria-disabled') === 'true');
}})()"#,
                        sel = js_str(selector)
                    ),
                    "continue probe",
                )
                .await?;

            if enabled {
                return match self
                    .driver()
                    .click_css(selector, std::time::Duration::from_secs(5))
                    .await
                {
                    Ok(()) => Ok((true, None)),
                    Err(err) if err.is_fatal() => Err(err.into_explore("continue")),
                    Err(err) => Ok((false, Some(format!("continue control click failed: {err}")))),
                };
            }

            attempt += 1;
            if !self.backoff.allows(attempt) {
                warn!(selector, "continue control never became enabled");
                return Ok((
                    false,
                    Some("continue control never became enabled".to_string()),
                ));
            }
            tokio::time::sleep(self.backoff.delay_for(attempt - 1)).await;
        }
    }

    async fn set_value_js(&self, selector: &str, value: &str) -> Result<bool, ExploreError> {
        let js = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.value = {val};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#,
            sel = js_str(selector),
            val = js_str(value)
        );
        self.eval_bool(&js, "set value").await
    }

    async fn eval_bool(&self, js: &str, what: &str) -> Result<bool, ExploreError> {
        match self.driver().evaluate(js).await {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(err) if err.is_fatal() => Err(err.into_explore(what)),
            Err(err) => {
                debug!("{what} script failed: {err}");
                Ok(false)
            }
        }
    }
}

fn group_size(field: &PageElement, fields: &[&PageElement]) -> usize {
    if field.group.is_none() {
        return 1;
    }
    fields
        .iter()
        .filter(|e| e.category == field.category && e.group == field.group)
        .count()
}

/// Resolve which captured form an action points at, by matching the action's
/// primary locator against the page's form elements.
fn find_form_index(action: &Action, page: &PageState) -> Option<u32> {
    let signature = action.target.signature();
    page.forms()
        .find(|form| {
            form.locators
                .iter()
                .any(|locator| locator.signature() == signature)
        })
        .and_then(|form| form.form_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedDriver;
    use serde_json::{json, Value};
    use sitescout_core_types::{ActionTarget, BackoffPolicy, Locator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn element(category: ElementCategory, css: &str) -> PageElement {
        PageElement {
            category,
            tag: "input".into(),
            text: String::new(),
            name: None,
            placeholder: None,
            aria_label: None,
            input_type: None,
            label_text: None,
            href: None,
            visible: true,
            enabled: true,
            checked: None,
            options: Vec::new(),
            form_index: Some(0),
            group: None,
            locators: vec![Locator::css(css), Locator::path(format!("form > {css}"))],
        }
    }

    fn radio(css: &str, label: &str) -> PageElement {
        PageElement {
            input_type: Some("radio".into()),
            label_text: Some(label.into()),
            group: Some("mode".into()),
            checked: Some(false),
            ..element(ElementCategory::Radio, css)
        }
    }

    fn form_page(mut extra: Vec<PageElement>) -> PageState {
        let mut form = element(ElementCategory::Form, "#setup-form");
        form.tag = "form".into();
        let mut elements = vec![form];
        elements.append(&mut extra);
        PageState::new("https://app.test/resumes/new", "New Resume", elements)
    }

    fn fill_action() -> Action {
        Action::fill_form(
            ActionTarget::from_locators(vec![Locator::css("#setup-form")], None),
            55,
            "exercise form",
        )
    }

    #[tokio::test]
    async fn start_from_scratch_option_wins_its_radio_group() {
        let driver = Arc::new(ScriptedDriver::new(|_| json!(true)));
        let executor = Executor::new(driver.clone()).with_pacing_ms(0, 0);
        let page = form_page(vec![
            radio("#r1", "Use a Template"),
            radio("#r2", "Start from Scratch"),
            radio("#r3", "Import Existing"),
        ]);

        let result = executor.execute(&fill_action(), &page).await.unwrap();
        assert!(result.success);
        assert_eq!(result.details.fields_filled, 1);
        assert_eq!(driver.clicks.lock().as_slice(), ["#r2"]);
        assert_eq!(result.details.continue_btn_found, Some(false));
    }

    #[tokio::test]
    async fn radio_group_without_blank_option_takes_first_enabled() {
        let driver = Arc::new(ScriptedDriver::new(|_| json!(true)));
        let executor = Executor::new(driver.clone()).with_pacing_ms(0, 0);
        let mut disabled = radio("#r1", "Use a Template");
        disabled.enabled = false;
        let page = form_page(vec![disabled, radio("#r2", "Import Existing")]);

        executor.execute(&fill_action(), &page).await.unwrap();
        assert_eq!(driver.clicks.lock().as_slice(), ["#r2"]);
    }

    #[tokio::test]
    async fn disabled_continue_is_polled_then_reported_not_found() {
        let probes = Arc::new(AtomicUsize::new(0));
        let probes_in_handler = probes.clone();
        let driver = Arc::new(ScriptedDriver::new(move |js: &str| {
            if js.contains("#continue") {
                probes_in_handler.fetch_add(1, Ordering::SeqCst);
                json!(false)
            } else {
                json!(true)
            }
        }));
        let executor = Executor::new(driver.clone())
            .with_pacing_ms(0, 0)
            .with_backoff(BackoffPolicy::new(5, 1).with_max_delay_ms(2));

        let mut title = element(ElementCategory::Input, "#title");
        title.name = Some("title".into());
        let mut cont = element(ElementCategory::Button, "#continue");
        cont.tag = "button".into();
        cont.text = "Continue".into();
        cont.enabled = false;
        let page = form_page(vec![title, cont]);

        let result = executor.execute(&fill_action(), &page).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.details.continue_btn_found, Some(false));
        assert_eq!(probes.load(Ordering::SeqCst), 5, "polled up to the budget");
        assert!(driver.clicks.lock().is_empty());
    }

    #[tokio::test]
    async fn continue_is_clicked_once_it_becomes_enabled() {
        let probes = Arc::new(AtomicUsize::new(0));
        let probes_in_handler = probes.clone();
        let driver = Arc::new(ScriptedDriver::new(move |js: &str| {
            if js.contains("#continue") {
                let n = probes_in_handler.fetch_add(1, Ordering::SeqCst);
                json!(n >= 2)
            } else {
                json!(true)
            }
        }));
        let executor = Executor::new(driver.clone())
            .with_pacing_ms(0, 0)
            .with_backoff(BackoffPolicy::new(5, 1).with_max_delay_ms(2));

        let mut cont = element(ElementCategory::Button, "#continue");
        cont.tag = "button".into();
        cont.text = "Continue".into();
        cont.enabled = false;
        let mut title = element(ElementCategory::Input, "#title");
        title.name = Some("title".into());
        let page = form_page(vec![title, cont]);

        let result = executor.execute(&fill_action(), &page).await.unwrap();
        assert!(result.success);
        assert_eq!(result.details.continue_btn_found, Some(true));
        assert_eq!(driver.clicks.lock().as_slice(), ["#continue"]);
    }

    #[tokio::test]
    async fn email_shaped_fields_get_email_shaped_values() {
        let driver = Arc::new(ScriptedDriver::new(|_| json!(true)));
        let executor = Executor::new(driver.clone()).with_pacing_ms(0, 0);
        let mut email = element(ElementCategory::Input, "#email");
        email.name = Some("email".into());
        let mut phone = element(ElementCategory::Input, "#phone");
        phone.input_type = Some("tel".into());
        let page = form_page(vec![email, phone]);

        let result = executor.execute(&fill_action(), &page).await.unwrap();
        assert_eq!(result.details.fields_filled, 2);
        let typed = driver.typed.lock();
        assert_eq!(typed[0], ("#email".to_string(), "alex.morgan@example.com".to_string()));
        assert_eq!(typed[1].1, "+1 555 014 2368");
    }

    #[tokio::test]
    async fn toggles_flip_only_when_off() {
        let driver = Arc::new(ScriptedDriver::new(|_| json!(true)));
        let executor = Executor::new(driver.clone()).with_pacing_ms(0, 0);
        let mut on = element(ElementCategory::Toggle, "#notify");
        on.checked = Some(true);
        let mut off = element(ElementCategory::Toggle, "#remote");
        off.checked = Some(false);
        let page = form_page(vec![on, off]);

        executor.execute(&fill_action(), &page).await.unwrap();
        assert_eq!(driver.clicks.lock().as_slice(), ["#remote"]);
    }

    #[tokio::test]
    async fn selects_skip_placeholder_options() {
        let scripts = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
        let scripts_in_handler = scripts.clone();
        let driver = Arc::new(ScriptedDriver::new(move |js: &str| {
            scripts_in_handler.lock().push(js.to_string());
            Value::Bool(true)
        }));
        let executor = Executor::new(driver).with_pacing_ms(0, 0);
        let mut select = element(ElementCategory::Select, "#team");
        select.tag = "select".into();
        select.options = vec![
            page_perceiver::SelectOption {
                value: String::new(),
                text: "Choose a team...".into(),
                disabled: false,
                selected: true,
            },
            page_perceiver::SelectOption {
                value: "eng".into(),
                text: "Engineering".into(),
                disabled: false,
                selected: false,
            },
        ];
        let page = form_page(vec![select]);

        let result = executor.execute(&fill_action(), &page).await.unwrap();
        assert_eq!(result.details.fields_filled, 1);
        assert!(scripts.lock().iter().any(|js| js.contains("\"eng\"")));
    }

    #[test]
    fn classifier_covers_the_enumerated_taxonomy() {
        let mut field = element(ElementCategory::Input, "#x");
        field.input_type = Some("email".into());
        assert_eq!(classify_field(&field), FieldKind::Email);

        field.input_type = None;
        field.placeholder = Some("LinkedIn profile URL".into());
        assert_eq!(classify_field(&field), FieldKind::Url);

        field.placeholder = Some("Expected salary".into());
        assert_eq!(classify_field(&field), FieldKind::Number);

        field.placeholder = Some("Tell us about yourself".into());
        assert_eq!(classify_field(&field), FieldKind::FreeText);
    }
}
