//! Snapshot capture: one injected script, one total parser.

use cdp_driver::Driver;
use serde_json::Value;
use sitescout_core_types::{ExploreError, Locator};
use tracing::{debug, warn};

use crate::model::{ElementCategory, PageElement, PageState, SelectOption};

/// Injected into the page; returns an array of raw element descriptors for
/// every attached interactive element. Zero-size and hidden elements are
/// filtered here, where layout information is cheap.
pub const SNAPSHOT_JS: &str = r#"
(() => {
  const out = [];
  const seen = new Set();
  const forms = Array.from(document.forms);
  const truncate = (s) => (s || '').replace(/\s+/g, ' ').trim().slice(0, 120);
  const pathOf = (el) => {
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1 && node !== document.documentElement) {
      let nth = 1, sib = node;
      while ((sib = sib.previousElementSibling)) {
        if (sib.tagName === node.tagName) nth++;
      }
      parts.unshift(node.tagName.toLowerCase() + ':nth-of-type(' + nth + ')');
      node = node.parentElement;
    }
    return parts.join(' > ');
  };
  const stableCss = (el) => {
    if (el.id) return '#' + CSS.escape(el.id);
    const tag = el.tagName.toLowerCase();
    if (el.name) return tag + '[name="' + CSS.escape(el.name) + '"]';
    const aria = el.getAttribute('aria-label');
    if (aria) return tag + '[aria-label="' + CSS.escape(aria) + '"]';
    const cls = Array.from(el.classList).slice(0, 2);
    if (cls.length) return tag + '.' + cls.map(c => CSS.escape(c)).join('.');
    return null;
  };
  const labelFor = (el) => {
    if (el.labels && el.labels.length) return truncate(el.labels[0].textContent);
    if (el.id) {
      const lab = document.querySelector('label[for="' + CSS.escape(el.id) + '"]');
      if (lab) return truncate(lab.textContent);
    }
    const wrap = el.closest('label');
    return wrap ? truncate(wrap.textContent) : null;
  };
  const visible = (el) => {
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) return false;
    const style = getComputedStyle(el);
    return style.visibility !== 'hidden' && style.display !== 'none';
  };
  const push = (el, extra) => {
    if (seen.has(el)) return;
    seen.add(el);
    if (!visible(el)) return;
    const form = el.closest('form');
    out.push(Object.assign({
      tag: el.tagName.toLowerCase(),
      text: truncate(el.innerText || el.value || ''),
      name: el.name || null,
      placeholder: el.placeholder || null,
      ariaLabel: el.getAttribute('aria-label'),
      role: el.getAttribute('role'),
      inputType: el.type || null,
      labelText: labelFor(el),
      href: el.getAttribute('href'),
      enabled: !(el.disabled || el.getAttribute('aria-disabled') === 'true'),
      checked: (el.type === 'checkbox' || el.type === 'radio' || el.getAttribute('role') === 'switch')
        ? (el.checked ?? el.getAttribute('aria-checked') === 'true') : null,
      inNav: !!el.closest('nav, [role="navigation"], aside'),
      inModal: !!el.closest('[role="dialog"], .modal, [aria-modal="true"]'),
      formIndex: form ? forms.indexOf(form) : null,
      group: (el.type === 'radio' || el.type === 'checkbox') ? (el.name || null) : null,
      selCss: stableCss(el),
      selPath: pathOf(el),
      options: el.tagName === 'SELECT'
        ? Array.from(el.options).map(o => ({
            value: o.value, text: truncate(o.textContent),
            disabled: o.disabled, selected: o.selected }))
        : null,
    }, extra || {}));
  };
  document.querySelectorAll(
    'input, textarea, select, button, a[href], form, ' +
    '[role="button"], [role="tab"], [role="switch"], [role="dialog"], ' +
    'h1, h2, h3, .modal'
  ).forEach(el => push(el));
  return out;
})()
"#;

/// Captures [`PageState`]s through a [`Driver`].
#[derive(Debug, Clone)]
pub struct PagePerceiver {
    /// Hard cap on elements kept per capture.
    max_elements: usize,
}

impl Default for PagePerceiver {
    fn default() -> Self {
        Self { max_elements: 400 }
    }
}

impl PagePerceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_elements(mut self, max: usize) -> Self {
        self.max_elements = max;
        self
    }

    /// Snapshot the current page. Read-only; a partially rendered page
    /// yields a partial state. Only driver-level failures surface as errors.
    pub async fn capture(&self, driver: &dyn Driver) -> Result<PageState, ExploreError> {
        let url = driver
            .current_url()
            .await
            .map_err(|e| e.into_explore("capture url"))?;
        let title = driver.title().await.unwrap_or_default();
        let raw = driver
            .evaluate(SNAPSHOT_JS)
            .await
            .map_err(|e| e.into_explore("capture snapshot"))?;

        let elements = self.parse_elements(&raw);
        debug!(url = %url, count = elements.len(), "captured page state");
        Ok(PageState::new(url, title, elements))
    }

    /// Parse raw descriptors into elements. Total: malformed entries are
    /// skipped, missing optional fields become `None`.
    pub fn parse_elements(&self, raw: &Value) -> Vec<PageElement> {
        let Some(items) = raw.as_array() else {
            warn!("snapshot script returned non-array payload");
            return Vec::new();
        };

        let mut elements = Vec::new();
        for item in items {
            if elements.len() >= self.max_elements {
                debug!(cap = self.max_elements, "element cap reached, truncating capture");
                break;
            }
            match parse_element(item) {
                Some(element) => elements.push(element),
                None => debug!("skipping malformed element descriptor"),
            }
        }
        elements
    }
}

fn parse_element(item: &Value) -> Option<PageElement> {
    let tag = item.get("tag")?.as_str()?.to_string();
    let text = str_field(item, "text").unwrap_or_default();
    let role = str_field(item, "role");
    let input_type = str_field(item, "inputType");
    let sel_css = str_field(item, "selCss");
    let sel_path = str_field(item, "selPath")?;

    let category = categorize(
        &tag,
        role.as_deref(),
        input_type.as_deref(),
        bool_field(item, "inNav"),
        bool_field(item, "inModal"),
        item.get("href").map(|v| !v.is_null()).unwrap_or(false),
    )?;

    // Two independent strategies minimum: a stable-identifier selector when
    // one exists, the structural path always, visible text when present.
    let mut locators = Vec::new();
    if let Some(css) = sel_css {
        locators.push(Locator::css(css));
    }
    locators.push(Locator::path(sel_path));
    if !text.is_empty() {
        locators.push(Locator::text(text.clone()));
    }
    if locators.len() < 2 {
        // Pathological element with no stable selector and no text; anchor a
        // second strategy on the tag-qualified path so the contract holds.
        let suffix = suffix_of(&locators[0].value);
        locators.push(Locator::css(format!("{tag}{suffix}")));
    }

    let options = item
        .get("options")
        .and_then(Value::as_array)
        .map(|opts| {
            opts.iter()
                .filter_map(|o| {
                    Some(SelectOption {
                        value: str_field(o, "value")?,
                        text: str_field(o, "text").unwrap_or_default(),
                        disabled: bool_field(o, "disabled"),
                        selected: bool_field(o, "selected"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(PageElement {
        category,
        tag,
        text,
        name: str_field(item, "name"),
        placeholder: str_field(item, "placeholder"),
        aria_label: str_field(item, "ariaLabel"),
        input_type,
        label_text: str_field(item, "labelText"),
        href: str_field(item, "href"),
        visible: true,
        enabled: item
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        checked: item.get("checked").and_then(Value::as_bool),
        options,
        form_index: item
            .get("formIndex")
            .and_then(Value::as_u64)
            .map(|i| i as u32),
        group: str_field(item, "group"),
        locators,
    })
}

fn categorize(
    tag: &str,
    role: Option<&str>,
    input_type: Option<&str>,
    in_nav: bool,
    in_modal: bool,
    has_href: bool,
) -> Option<ElementCategory> {
    // Modal containers are captured as their own category so the report can
    // count them; elements inside a modal keep their own kind.
    if role == Some("dialog") || (tag == "div" && in_modal) {
        return Some(ElementCategory::Modal);
    }
    match (tag, role, input_type) {
        (_, Some("tab"), _) => Some(ElementCategory::Tab),
        (_, Some("switch"), _) => Some(ElementCategory::Toggle),
        ("h1" | "h2" | "h3", _, _) => Some(ElementCategory::Heading),
        ("form", _, _) => Some(ElementCategory::Form),
        ("select", _, _) => Some(ElementCategory::Select),
        ("textarea", _, _) => Some(ElementCategory::Input),
        ("button", _, _) | (_, Some("button"), _) => Some(ElementCategory::Button),
        ("input", _, Some("submit" | "button")) => Some(ElementCategory::Button),
        ("input", _, Some("checkbox")) => Some(ElementCategory::Checkbox),
        ("input", _, Some("radio")) => Some(ElementCategory::Radio),
        ("input", _, _) => Some(ElementCategory::Input),
        ("a", _, _) if has_href && in_nav => Some(ElementCategory::Navigation),
        ("a", _, _) if has_href => Some(ElementCategory::Link),
        _ => None,
    }
}

fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn bool_field(item: &Value, key: &str) -> bool {
    item.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn suffix_of(path: &str) -> String {
    path.rsplit('>')
        .next()
        .map(|last| last.trim().trim_start_matches(|c: char| c.is_alphanumeric()).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(tag: &str, extra: Value) -> Value {
        let mut base = json!({
            "tag": tag,
            "text": "Sample",
            "enabled": true,
            "selPath": "div:nth-of-type(1) > button:nth-of-type(2)",
        });
        base.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        base
    }

    #[test]
    fn every_parsed_element_has_two_locator_strategies() {
        let perceiver = PagePerceiver::new();
        let raw = json!([
            descriptor("button", json!({"selCss": "#save"})),
            descriptor("input", json!({"inputType": "text", "text": ""})),
            descriptor("a", json!({"href": "/jobs", "inNav": true})),
        ]);
        let elements = perceiver.parse_elements(&raw);
        assert_eq!(elements.len(), 3);
        for element in &elements {
            assert!(element.locators.len() >= 2, "{:?}", element.tag);
        }
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let perceiver = PagePerceiver::new();
        let raw = json!([
            {"bogus": true},
            42,
            descriptor("button", json!({"selCss": "#ok"})),
        ]);
        let elements = perceiver.parse_elements(&raw);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].category, ElementCategory::Button);
    }

    #[test]
    fn non_array_payload_yields_empty_state() {
        let perceiver = PagePerceiver::new();
        assert!(perceiver.parse_elements(&json!({"documents": []})).is_empty());
    }

    #[test]
    fn categories_follow_tag_role_and_type() {
        assert_eq!(
            categorize("a", None, None, true, false, true),
            Some(ElementCategory::Navigation)
        );
        assert_eq!(
            categorize("input", None, Some("radio"), false, false, false),
            Some(ElementCategory::Radio)
        );
        assert_eq!(
            categorize("div", Some("dialog"), None, false, true, false),
            Some(ElementCategory::Modal)
        );
        assert_eq!(
            categorize("span", Some("tab"), None, false, false, false),
            Some(ElementCategory::Tab)
        );
        assert_eq!(categorize("div", None, None, false, false, false), None);
    }

    #[test]
    fn element_cap_truncates_capture() {
        let perceiver = PagePerceiver::new().with_max_elements(2);
        let raw = json!([
            descriptor("button", json!({})),
            descriptor("button", json!({})),
            descriptor("button", json!({})),
        ]);
        assert_eq!(perceiver.parse_elements(&raw).len(), 2);
    }

    #[test]
    fn select_options_are_parsed() {
        let perceiver = PagePerceiver::new();
        let raw = json!([descriptor(
            "select",
            json!({"options": [
                {"value": "", "text": "Choose...", "disabled": false, "selected": true},
                {"value": "eng", "text": "Engineering", "disabled": false, "selected": false},
            ]})
        )]);
        let elements = perceiver.parse_elements(&raw);
        assert_eq!(elements[0].options.len(), 2);
        assert_eq!(elements[0].options[1].value, "eng");
    }
}
