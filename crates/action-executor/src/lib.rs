//! Action Executor: performs one decided action against the live page.
//!
//! Elements are re-resolved at execution time through a locator fallback
//! chain — the DOM may have mutated since capture, so the primary locator,
//! declared fallbacks, and a last-resort text match are each tried in order.
//! Locator exhaustion and inert elements are reported as failed
//! [`ActionResult`]s, never thrown past the executor boundary; only a lost
//! browser session (and a twice-timed-out navigation) surfaces as an error.

pub mod forms;
pub mod resolve;

use std::sync::Arc;
use std::time::Duration;

use cdp_driver::Driver;
use page_perceiver::PageState;
use sitescout_core_types::backoff::pacing_delay;
use sitescout_core_types::{
    Action, ActionDetails, ActionKind, ActionResult, BackoffPolicy, ExploreError,
};
use tracing::{debug, info, warn};

pub use forms::{classify_field, sample_value, FieldKind};
pub use resolve::Resolved;

/// Executes actions through a [`Driver`].
pub struct Executor {
    driver: Arc<dyn Driver>,
    /// Shared retry schedule: continue-button polling and navigation retry.
    backoff: BackoffPolicy,
    nav_timeout: Duration,
    interact_timeout: Duration,
    /// Randomized pacing bounds between actions, milliseconds.
    pacing_ms: (u64, u64),
}

impl Executor {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            backoff: BackoffPolicy::new(5, 400).with_max_delay_ms(2_000),
            nav_timeout: Duration::from_secs(20),
            interact_timeout: Duration::from_secs(8),
            pacing_ms: (400, 1_600),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_nav_timeout(mut self, timeout: Duration) -> Self {
        self.nav_timeout = timeout;
        self
    }

    pub fn with_pacing_ms(mut self, min: u64, max: u64) -> Self {
        self.pacing_ms = (min, max);
        self
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Execute one action. `Ok(result)` covers both success and the
    /// non-fatal failure modes; `Err` is reserved for session loss and for
    /// a navigation that timed out twice.
    pub async fn execute(
        &self,
        action: &Action,
        page: &PageState,
    ) -> Result<ActionResult, ExploreError> {
        debug!(kind = action.kind.name(), rationale = %action.rationale, "executing action");
        let result = match action.kind {
            ActionKind::Navigate => self.navigate(action).await,
            ActionKind::Click | ActionKind::SwitchTab => self.click(action).await,
            ActionKind::FillForm => self.fill_form(action, page).await,
            ActionKind::Scroll => self.scroll().await,
            ActionKind::Wait => self.wait().await,
        };

        // Deliberate anti-detection pacing; one session, one DOM, never
        // parallelized or skipped.
        tokio::time::sleep(pacing_delay(self.pacing_ms.0, self.pacing_ms.1)).await;

        match &result {
            Ok(r) if r.success => {
                info!(kind = action.kind.name(), "action ok");
            }
            Ok(r) => {
                info!(
                    kind = action.kind.name(),
                    error = r.error.as_deref().unwrap_or("unknown"),
                    "action failed"
                );
            }
            Err(err) => warn!(kind = action.kind.name(), "action error: {err}"),
        }
        result
    }

    async fn navigate(&self, action: &Action) -> Result<ActionResult, ExploreError> {
        let Some(url) = action.url.as_deref() else {
            return Ok(ActionResult::failed(
                "navigate action without a url",
                ActionDetails::default(),
            ));
        };

        // One retry on timeout; a second timeout propagates so the
        // controller can mark the target failed and move on.
        let mut attempt = 0u32;
        loop {
            match self.driver.navigate(url, self.nav_timeout).await {
                Ok(()) => break,
                Err(err) if err.is_fatal() => return Err(err.into_explore("navigate")),
                Err(cdp_driver::DriverError::Timeout(msg)) if attempt == 0 => {
                    warn!(url, "navigation timed out, retrying once: {msg}");
                    attempt += 1;
                    tokio::time::sleep(self.backoff.delay_for(0)).await;
                }
                Err(cdp_driver::DriverError::Timeout(msg)) => {
                    return Err(ExploreError::navigation_timeout(format!("{url}: {msg}")));
                }
                Err(err) => {
                    return Ok(ActionResult::failed(
                        err.to_string(),
                        ActionDetails {
                            method: Some("navigate".into()),
                            ..Default::default()
                        },
                    ))
                }
            }
        }

        Ok(ActionResult::ok(ActionDetails {
            method: Some("navigate".into()),
            resulting_url: self.driver.current_url().await.ok(),
            ..Default::default()
        }))
    }

    async fn click(&self, action: &Action) -> Result<ActionResult, ExploreError> {
        let resolved = match self.resolve_target(&action.target).await? {
            Ok(resolved) => resolved,
            Err(failure) => return Ok(failure),
        };

        match self
            .driver
            .click_css(&resolved.selector, self.interact_timeout)
            .await
        {
            Ok(()) => Ok(ActionResult::ok(ActionDetails {
                method: Some(resolved.method),
                resulting_url: self.driver.current_url().await.ok(),
                ..Default::default()
            })),
            Err(err) if err.is_fatal() => Err(err.into_explore("click")),
            Err(err) => Ok(ActionResult::failed(
                err.to_string(),
                ActionDetails {
                    method: Some(resolved.method),
                    ..Default::default()
                },
            )),
        }
    }

    async fn scroll(&self) -> Result<ActionResult, ExploreError> {
        self.driver
            .evaluate("window.scrollBy(0, Math.round(window.innerHeight * 0.8)); true")
            .await
            .map_err(|err| err.into_explore("scroll"))?;
        Ok(ActionResult::ok(ActionDetails {
            method: Some("scroll".into()),
            ..Default::default()
        }))
    }

    async fn wait(&self) -> Result<ActionResult, ExploreError> {
        tokio::time::sleep(pacing_delay(800, 1_500)).await;
        Ok(ActionResult::ok(ActionDetails {
            method: Some("wait".into()),
            ..Default::default()
        }))
    }
}

/// Encode a string as a JS string literal for script injection.
pub(crate) fn js_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
pub(crate) mod testutil {
    use async_trait::async_trait;
    use cdp_driver::{Driver, DriverError};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::time::Duration;

    type EvalHandler = Box<dyn Fn(&str) -> Value + Send + Sync>;

    /// Scripted driver: `evaluate` answers via a closure over the script
    /// text, clicks and typed text are recorded for assertions.
    pub struct ScriptedDriver {
        pub handler: EvalHandler,
        pub clicks: Mutex<Vec<String>>,
        pub typed: Mutex<Vec<(String, String)>>,
        pub navigations: Mutex<Vec<String>>,
        pub url: Mutex<String>,
        pub content: Mutex<String>,
    }

    impl ScriptedDriver {
        pub fn new(handler: impl Fn(&str) -> Value + Send + Sync + 'static) -> Self {
            Self {
                handler: Box::new(handler),
                clicks: Mutex::new(Vec::new()),
                typed: Mutex::new(Vec::new()),
                navigations: Mutex::new(Vec::new()),
                url: Mutex::new("https://app.test/board".to_string()),
                content: Mutex::new(String::new()),
            }
        }
    }

    #[async_trait]
    impl Driver for ScriptedDriver {
        async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
            self.navigations.lock().push(url.to_string());
            *self.url.lock() = url.to_string();
            Ok(())
        }

        async fn evaluate(&self, js: &str) -> Result<Value, DriverError> {
            Ok((self.handler)(js))
        }

        async fn click_css(&self, selector: &str, _timeout: Duration) -> Result<(), DriverError> {
            self.clicks.lock().push(selector.to_string());
            Ok(())
        }

        async fn type_css(
            &self,
            selector: &str,
            text: &str,
            _timeout: Duration,
        ) -> Result<(), DriverError> {
            self.typed.lock().push((selector.to_string(), text.to_string()));
            Ok(())
        }

        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(self.url.lock().clone())
        }

        async fn title(&self) -> Result<String, DriverError> {
            Ok("Scripted".to_string())
        }

        async fn content(&self) -> Result<String, DriverError> {
            Ok(self.content.lock().clone())
        }

        async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
            Ok(vec![0u8; 4])
        }
    }
}
