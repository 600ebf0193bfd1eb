//! Login glue: satisfies the engine's precondition that the session is
//! already authenticated before the first iteration.
//!
//! This lives beside the CLI on purpose — the engine never sees
//! credentials.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use cdp_driver::Driver;
use serde_json::Value;
use tracing::{debug, info};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Locates the visible login form, if any.
const LOGIN_PROBE_JS: &str = r#"
(() => {
  const forms = Array.from(document.querySelectorAll('form'));
  for (const form of forms) {
    const pass = form.querySelector('input[type="password"]');
    if (!pass) continue;
    const user = form.querySelector(
      'input[type="email"], input[name*="email" i], input[name*="user" i], input[type="text"]');
    const submit = form.querySelector('button[type="submit"], input[type="submit"], button');
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
    return {
      found: true,
      user: user ? pathOf(user) : null,
      pass: pathOf(pass),
      submit: submit ? pathOf(submit) : null,
    };
  }
  return { found: false };
})()
"#;

/// Navigate to the application and authenticate. A page without a password
/// field is treated as an already-live session (cookie reuse) and succeeds.
pub async fn login(
    driver: &dyn Driver,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<()> {
    driver
        .navigate(base_url, LOGIN_TIMEOUT)
        .await
        .with_context(|| format!("opening {base_url}"))?;

    let probe = driver
        .evaluate(LOGIN_PROBE_JS)
        .await
        .context("probing for a login form")?;

    if !probe.get("found").and_then(Value::as_bool).unwrap_or(false) {
        info!("no login form present, assuming an authenticated session");
        return Ok(());
    }

    let pass_selector = probe
        .get("pass")
        .and_then(Value::as_str)
        .context("login form probe returned no password selector")?;
    if let Some(user_selector) = probe.get("user").and_then(Value::as_str) {
        driver
            .type_css(user_selector, username, LOGIN_TIMEOUT)
            .await
            .context("filling username")?;
    }
    driver
        .type_css(pass_selector, password, LOGIN_TIMEOUT)
        .await
        .context("filling password")?;

    if let Some(submit_selector) = probe.get("submit").and_then(Value::as_str) {
        driver
            .click_css(submit_selector, LOGIN_TIMEOUT)
            .await
            .context("submitting login form")?;
    } else {
        debug!("no submit control, submitting the form directly");
        driver
            .evaluate("document.querySelector('input[type=\"password\"]').form.submit(); true")
            .await
            .context("submitting login form via script")?;
    }

    // Give the app a moment to settle, then verify the form is gone.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let still_present = driver
        .evaluate("!!document.querySelector('input[type=\"password\"]')")
        .await
        .map(|v| v.as_bool().unwrap_or(false))
        .unwrap_or(false);
    if still_present {
        bail!("login did not complete; check the supplied credentials");
    }

    info!("login completed");
    Ok(())
}
