//! Page and element model produced by the introspector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitescout_core_types::Locator;
use url::Url;

/// What kind of interactive surface an element is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCategory {
    Button,
    Input,
    Select,
    Checkbox,
    Radio,
    Toggle,
    Link,
    Navigation,
    Tab,
    Form,
    Modal,
    Heading,
}

impl ElementCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ElementCategory::Button => "button",
            ElementCategory::Input => "input",
            ElementCategory::Select => "select",
            ElementCategory::Checkbox => "checkbox",
            ElementCategory::Radio => "radio",
            ElementCategory::Toggle => "toggle",
            ElementCategory::Link => "link",
            ElementCategory::Navigation => "navigation",
            ElementCategory::Tab => "tab",
            ElementCategory::Form => "form",
            ElementCategory::Modal => "modal",
            ElementCategory::Heading => "heading",
        }
    }
}

/// A `<select>` option as captured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub selected: bool,
}

/// One interactive element, with enough identity for two or more locator
/// strategies and enough semantics for field-kind classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageElement {
    pub category: ElementCategory,
    pub tag: String,

    /// Visible text, truncated at capture time.
    #[serde(default)]
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    /// Text of an associated `<label>`, when one points at this element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,

    pub visible: bool,
    pub enabled: bool,

    /// Checked state for checkboxes, radios, and toggles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,

    /// Options for selects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,

    /// Index of the enclosing form on the page, when inside one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_index: Option<u32>,

    /// Name of the radio/checkbox group this element belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Locator strategies in resolution order; always at least two.
    pub locators: Vec<Locator>,
}

impl PageElement {
    /// Best human label for this element: label text, aria-label,
    /// placeholder, then visible text.
    pub fn label(&self) -> &str {
        self.label_text
            .as_deref()
            .or(self.aria_label.as_deref())
            .or(self.placeholder.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.text)
    }

    /// Combined hint string for field-kind classification.
    pub fn semantic_hints(&self) -> String {
        [
            self.name.as_deref(),
            self.placeholder.as_deref(),
            self.aria_label.as_deref(),
            self.label_text.as_deref(),
            self.input_type.as_deref(),
        ]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
    }
}

/// The interactive surface of one captured page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    /// Normalized page identity (scheme/host/path, no query or fragment).
    pub page_key: String,
    pub title: String,
    pub captured_at: DateTime<Utc>,
    pub elements: Vec<PageElement>,
}

impl PageState {
    pub fn new(url: impl Into<String>, title: impl Into<String>, elements: Vec<PageElement>) -> Self {
        let url = url.into();
        Self {
            page_key: page_key(&url),
            url,
            title: title.into(),
            captured_at: Utc::now(),
            elements,
        }
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn of_category(&self, category: ElementCategory) -> impl Iterator<Item = &PageElement> {
        self.elements.iter().filter(move |e| e.category == category)
    }

    pub fn buttons(&self) -> impl Iterator<Item = &PageElement> {
        self.of_category(ElementCategory::Button)
    }

    pub fn links(&self) -> impl Iterator<Item = &PageElement> {
        self.elements
            .iter()
            .filter(|e| matches!(e.category, ElementCategory::Link | ElementCategory::Navigation))
    }

    pub fn navigation(&self) -> impl Iterator<Item = &PageElement> {
        self.of_category(ElementCategory::Navigation)
    }

    pub fn tabs(&self) -> impl Iterator<Item = &PageElement> {
        self.of_category(ElementCategory::Tab)
    }

    pub fn forms(&self) -> impl Iterator<Item = &PageElement> {
        self.of_category(ElementCategory::Form)
    }

    pub fn modals(&self) -> impl Iterator<Item = &PageElement> {
        self.of_category(ElementCategory::Modal)
    }

    pub fn has_modal(&self) -> bool {
        self.modals().next().is_some()
    }
}

/// Resolve a possibly-relative `href` against the page it was captured on.
/// Returns `None` for fragments, `javascript:` pseudo-links, and anything
/// that resolves onto a different host.
pub fn resolve_href(page_url: &str, href: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("mailto:")
    {
        return None;
    }
    let base = Url::parse(page_url).ok()?;
    let resolved = base.join(trimmed).ok()?;
    if resolved.host_str() != base.host_str() {
        return None;
    }
    Some(resolved.to_string())
}

/// Normalize a URL into a page identity: scheme + host + path, query and
/// fragment stripped, trailing slash trimmed. Query-varying views of one
/// route collapse into a single identity.
pub fn page_key(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let path = url.path().trim_end_matches('/');
            format!("{}{}", host, path)
        }
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or(raw)
            .trim_end_matches('/')
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_key_strips_query_fragment_and_slash() {
        assert_eq!(
            page_key("https://app.test/jobs/?sort=asc#top"),
            "app.test/jobs"
        );
        assert_eq!(page_key("https://app.test/jobs"), "app.test/jobs");
    }

    #[test]
    fn resolve_href_handles_relative_and_rejects_offsite() {
        assert_eq!(
            resolve_href("https://app.test/board", "/contacts").as_deref(),
            Some("https://app.test/contacts")
        );
        assert_eq!(resolve_href("https://app.test/board", "#section"), None);
        assert_eq!(
            resolve_href("https://app.test/board", "javascript:void(0)"),
            None
        );
        assert_eq!(
            resolve_href("https://app.test/board", "https://other.test/x"),
            None
        );
    }

    #[test]
    fn page_key_tolerates_unparsable_input() {
        assert_eq!(page_key("/relative/path?x=1"), "/relative/path");
    }

    #[test]
    fn label_prefers_label_text() {
        let element = PageElement {
            category: ElementCategory::Input,
            tag: "input".into(),
            text: String::new(),
            name: Some("email".into()),
            placeholder: Some("you@example.com".into()),
            aria_label: None,
            input_type: Some("text".into()),
            label_text: Some("Work email".into()),
            href: None,
            visible: true,
            enabled: true,
            checked: None,
            options: Vec::new(),
            form_index: Some(0),
            group: None,
            locators: vec![Locator::css("#email"), Locator::path("form > input:nth-of-type(1)")],
        };
        assert_eq!(element.label(), "Work email");
        assert!(element.semantic_hints().contains("email"));
    }
}
