//! Chromium-backed [`Driver`] implementation over chromiumoxide.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{Driver, DriverError};

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Deadline applied to calls that have no explicit per-call timeout.
    pub default_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1440,
            window_height: 900,
            default_timeout: Duration::from_secs(15),
        }
    }
}

/// One browser, one page, strictly sequential use.
pub struct CdpDriver {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    default_timeout: Duration,
}

impl CdpDriver {
    /// Launch a Chromium instance and open the session's single page.
    pub async fn launch(options: LaunchOptions) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.window_width, options.window_height);
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|err| DriverError::Session(format!("browser config: {err}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| DriverError::Session(format!("launch failed: {err}")))?;

        // The handler stream must be pumped for the whole browser lifetime.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    warn!("cdp handler error: {err}");
                    break;
                }
            }
            debug!("cdp handler loop ended");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| DriverError::Session(format!("new page: {err}")))?;

        Ok(Self {
            browser,
            page,
            handler_task,
            default_timeout: options.default_timeout,
        })
    }

    /// Close the browser and stop the handler loop.
    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!("browser close failed: {err}");
        }
        self.handler_task.abort();
    }

    async fn bounded<T, F>(&self, deadline: Duration, what: &str, fut: F) -> Result<T, DriverError>
    where
        F: std::future::Future<Output = Result<T, chromiumoxide::error::CdpError>>,
    {
        match timeout(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(what, err)),
            Err(_) => Err(DriverError::Timeout(format!(
                "{what} exceeded {}ms",
                deadline.as_millis()
            ))),
        }
    }
}

/// Classify a chromiumoxide error: transport loss means the session is
/// gone, everything else is a per-call protocol failure.
fn classify(what: &str, err: chromiumoxide::error::CdpError) -> DriverError {
    use chromiumoxide::error::CdpError;
    match err {
        CdpError::Ws(e) => DriverError::Session(format!("{what}: websocket: {e}")),
        CdpError::ChannelSendError(e) => DriverError::Session(format!("{what}: channel: {e}")),
        other => DriverError::Protocol(format!("{what}: {other}")),
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), DriverError> {
        debug!(url, "navigate");
        self.bounded(deadline, "navigate", async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, js: &str) -> Result<Value, DriverError> {
        let result = self
            .bounded(self.default_timeout, "evaluate", self.page.evaluate(js))
            .await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn click_css(&self, selector: &str, deadline: Duration) -> Result<(), DriverError> {
        debug!(selector, "click");
        self.bounded(deadline, "click", async {
            let element = self.page.find_element(selector).await?;
            element.scroll_into_view().await?;
            element.click().await?;
            Ok(())
        })
        .await
    }

    async fn type_css(
        &self,
        selector: &str,
        text: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        debug!(selector, "type");
        self.bounded(deadline, "type", async {
            let element = self.page.find_element(selector).await?;
            element.click().await?;
            element.type_str(text).await?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let url = self
            .bounded(self.default_timeout, "url", self.page.url())
            .await?;
        Ok(url.unwrap_or_default())
    }

    async fn title(&self) -> Result<String, DriverError> {
        let title = self
            .bounded(self.default_timeout, "title", self.page.get_title())
            .await?;
        Ok(title.unwrap_or_default())
    }

    async fn content(&self) -> Result<String, DriverError> {
        self.bounded(self.default_timeout, "content", self.page.content())
            .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.bounded(
            Duration::from_secs(10),
            "screenshot",
            self.page.screenshot(params),
        )
        .await
    }
}
