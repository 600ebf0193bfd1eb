//! Locator resolution: primary locator, declared fallbacks, last-resort
//! text match.

use sitescout_core_types::{ActionResult, ActionTarget, ExploreError, Locator, LocatorStrategy};
use tracing::debug;

use crate::{js_str, Executor};

/// Outcome of a successful resolution: a concrete CSS selector to interact
/// through and the strategy that produced it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub selector: String,
    pub method: String,
}

/// Probe result decoded from the page.
struct Probe {
    found: bool,
    visible: bool,
    enabled: bool,
    /// Structural path computed page-side for text matches.
    path: Option<String>,
}

impl Executor {
    /// Walk the locator chain. `Ok(Ok(resolved))` when an interactable
    /// element was found; `Ok(Err(result))` carries the non-fatal failure
    /// to report; `Err` is session loss only.
    pub(crate) async fn resolve_target(
        &self,
        target: &ActionTarget,
    ) -> Result<Result<Resolved, ActionResult>, ExploreError> {
        let mut inert: Option<String> = None;

        for locator in target.chain() {
            match self.probe_locator(locator).await? {
                probe if !probe.found => {
                    debug!(locator = %locator, "locator missed");
                }
                probe if !(probe.visible && probe.enabled) => {
                    debug!(locator = %locator, "locator found an inert element");
                    inert.get_or_insert_with(|| locator.to_string());
                }
                probe => {
                    let selector = match locator.strategy {
                        LocatorStrategy::Text => match probe.path {
                            Some(path) => path,
                            None => continue,
                        },
                        _ => locator.value.clone(),
                    };
                    return Ok(Ok(Resolved {
                        selector,
                        method: locator.strategy.name().to_string(),
                    }));
                }
            }
        }

        // Last resort: the captured element text, even when no text locator
        // was declared.
        if let Some(text) = target.text.as_deref().filter(|t| !t.is_empty()) {
            let last_resort = Locator::text(text);
            if !target.chain().any(|l| l == &last_resort) {
                if let probe @ Probe { found: true, .. } = self.probe_locator(&last_resort).await? {
                    if probe.visible && probe.enabled {
                        if let Some(path) = probe.path {
                            return Ok(Ok(Resolved {
                                selector: path,
                                method: "text-last-resort".to_string(),
                            }));
                        }
                    } else {
                        inert.get_or_insert_with(|| last_resort.to_string());
                    }
                }
            }
        }

        let failure = match inert {
            Some(locator) => ActionResult::failed(
                format!("element not interactable: {locator}"),
                Default::default(),
            ),
            None => ActionResult::failed(
                "locator not found: all strategies exhausted".to_string(),
                Default::default(),
            ),
        };
        Ok(Err(failure))
    }

    async fn probe_locator(&self, locator: &Locator) -> Result<Probe, ExploreError> {
        let js = match locator.strategy {
            LocatorStrategy::Css | LocatorStrategy::Path => probe_selector_js(&locator.value),
            LocatorStrategy::Text => probe_text_js(&locator.value),
        };
        let value = match self.driver().evaluate(&js).await {
            Ok(value) => value,
            Err(err) if err.is_fatal() => return Err(err.into_explore("probe")),
            Err(err) => {
                debug!(locator = %locator, "probe script failed: {err}");
                return Ok(Probe {
                    found: false,
                    visible: false,
                    enabled: false,
                    path: None,
                });
            }
        };
        Ok(Probe {
            found: value.get("found").and_then(|v| v.as_bool()).unwrap_or(false),
            visible: value
                .get("visible")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            enabled: value
                .get("enabled")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            path: value
                .get("path")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

/// Existence/visibility/enabled probe for a CSS or structural selector.
fn probe_selector_js(selector: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return {{ found: false }};
  const rect = el.getBoundingClientRect();
  const style = getComputedStyle(el);
  return {{
    found: true,
    visible: rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none',
    enabled: !(el.disabled || el.getAttribute('aria-disabled') === 'true'),
  }};
}})()"#,
        sel = js_str(selector)
    )
}

/// Case-insensitive text match over clickable elements; returns the match's
/// structural path so interaction can go through `querySelector`.
fn probe_text_js(text: &str) -> String {
    format!(
        r#"(() => {{
  const needle = {needle}.trim().toLowerCase();
  const candidates = document.querySelectorAll(
    'a, button, input, select, textarea, label, [role="button"], [role="tab"], [role="switch"]');
  for (const el of candidates) {{
    const label = (el.innerText || el.value || '').trim().toLowerCase();
    if (!label || !(label === needle || label.includes(needle))) continue;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) continue;
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1 && node !== document.documentElement) {{
      let nth = 1, sib = node;
      while ((sib = sib.previousElementSibling)) {{
        if (sib.tagName === node.tagName) nth++;
      }}
      parts.unshift(node.tagName.toLowerCase() + ':nth-of-type(' + nth + ')');
      node = node.parentElement;
    }}
    const style = getComputedStyle(el);
    return {{
      found: true,
      visible: style.visibility !== 'hidden' && style.display !== 'none',
      enabled: !(el.disabled || el.getAttribute('aria-disabled') === 'true'),
      path: parts.join(' > '),
    }};
  }}
  return {{ found: false }};
}})()"#,
        needle = js_str(text)
    )
}
