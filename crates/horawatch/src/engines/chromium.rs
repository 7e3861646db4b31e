//! Chromium-backed engine over the Chrome DevTools Protocol.
//!
//! Only chromium is bundled; the [`BrowserKind`] choice stays in the trait so
//! another engine implementation can honor firefox/webkit. Launch arguments
//! mirror what the target site tolerates: no automation banner, no autofill,
//! no popup blocking, incognito.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{BrowserEngine, BrowserKind, EngineConfig, EngineLauncher, Persona};
use crate::errors::WatchError;
use crate::scripts;

/// Upper bound for any single CDP interaction.
const INTERACTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Poll period for selector waits.
const SELECTOR_POLL: Duration = Duration::from_millis(250);

const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-web-security",
    "--incognito",
    "--disable-save-password-bubble",
    "--disable-autofill",
    "--disable-password-generation",
    "--disable-password-manager",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-dev-shm-usage",
    "--disable-background-timer-throttling",
    "--disable-renderer-backgrounding",
    "--disable-backgrounding-occluded-windows",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
];

pub struct ChromiumEngine {
    browser: Mutex<Option<Browser>>,
    page: Mutex<Option<Page>>,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    persona: Persona,
}

impl ChromiumEngine {
    /// Launch a chromium instance and open its single page.
    pub async fn launch(config: &EngineConfig) -> Result<Self, WatchError> {
        if config.kind != BrowserKind::Chromium {
            return Err(WatchError::UnsupportedEngine(format!(
                "{} (this build bundles chromium only)",
                config.kind
            )));
        }

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(config.persona.viewport_width, config.persona.viewport_height)
            .args(LAUNCH_ARGS.iter().copied());
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(WatchError::Bootstrap)?;

        info!("🌐 launching chromium (headless: {})", config.headless);
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| WatchError::Bootstrap(format!("chromium launch failed: {e}")))?;

        // The handler stream must be drained for the whole browser lifetime.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| WatchError::Bootstrap(format!("could not open a page: {e}")))?;
        apply_persona(&page, &config.persona).await?;

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page: Mutex::new(Some(page)),
            handler_task: std::sync::Mutex::new(Some(handler_task)),
            persona: config.persona.clone(),
        })
    }

    async fn page(&self) -> Result<Page, WatchError> {
        self.page.lock().await.clone().ok_or(WatchError::SessionClosed)
    }
}

/// Present the configured identity and defeat caching before any navigation.
async fn apply_persona(page: &Page, persona: &Persona) -> Result<(), WatchError> {
    let ua = SetUserAgentOverrideParams::builder()
        .user_agent(persona.user_agent.clone())
        .accept_language(persona.locale.clone())
        .build()
        .map_err(WatchError::Bootstrap)?;
    page.execute(ua)
        .await
        .map_err(|e| WatchError::Bootstrap(format!("user-agent override failed: {e}")))?;

    let headers = Headers::new(serde_json::json!({
        "Cache-Control": "no-cache, no-store, must-revalidate",
        "Pragma": "no-cache",
        "Expires": "0"
    }));
    page.execute(SetExtraHttpHeadersParams::new(headers))
        .await
        .map_err(|e| WatchError::Bootstrap(format!("header override failed: {e}")))?;

    Ok(())
}

async fn bounded<T, F>(what: &str, fut: F) -> Result<T, WatchError>
where
    F: std::future::Future<Output = Result<T, WatchError>>,
{
    tokio::time::timeout(INTERACTION_TIMEOUT, fut)
        .await
        .map_err(|_| WatchError::Timeout(format!("{what} exceeded {INTERACTION_TIMEOUT:?}")))?
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn goto(&self, url: &str) -> Result<(), WatchError> {
        let page = self.page().await?;
        bounded("navigation", async {
            page.goto(url)
                .await
                .map_err(|e| WatchError::Navigation(format!("goto {url} failed: {e}")))?;
            if let Err(e) = page.wait_for_navigation().await {
                debug!("load-event wait reported: {e}");
            }
            Ok(())
        })
        .await
    }

    async fn wait_for_quiescence(&self, timeout: Duration) -> Result<(), WatchError> {
        let page = self.page().await?;
        let script = scripts::network_idle(timeout.as_millis() as u64, 1000);
        match tokio::time::timeout(timeout + Duration::from_secs(2), page.evaluate(script)).await {
            Ok(Ok(result)) => {
                let info: Value = result.into_value().unwrap_or(Value::Null);
                let ok = info.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
                if !ok {
                    warn!("network-idle heuristic expired without settling");
                }
                Ok(())
            }
            Ok(Err(e)) => {
                // A failed probe is not fatal to the flow; the page may be
                // mid-navigation. Give it a moment instead.
                debug!("network-idle probe failed: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            }
            Err(_) => Err(WatchError::Timeout(format!(
                "quiescence wait exceeded {timeout:?}"
            ))),
        }
    }

    async fn current_url(&self) -> Result<String, WatchError> {
        let page = self.page().await?;
        bounded("url read", async {
            page.url()
                .await
                .map_err(|e| WatchError::Script(format!("url read failed: {e}")))
                .map(|url| url.unwrap_or_else(|| "about:blank".to_string()))
        })
        .await
    }

    async fn content(&self) -> Result<String, WatchError> {
        let page = self.page().await?;
        bounded("content read", async {
            page.content()
                .await
                .map_err(|e| WatchError::Script(format!("content read failed: {e}")))
        })
        .await
    }

    async fn exists(&self, selector: &str) -> Result<bool, WatchError> {
        let value = self.eval(&scripts::selector_exists(selector)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, WatchError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.exists(selector).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<(), WatchError> {
        let page = self.page().await?;
        bounded("click", async {
            let element = page
                .find_element(selector)
                .await
                .map_err(|e| WatchError::ElementNotFound(format!("{selector}: {e}")))?;
            element
                .click()
                .await
                .map_err(|e| WatchError::Interaction(format!("click on {selector} failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), WatchError> {
        let page = self.page().await?;
        let press = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(WatchError::Interaction)?;
        let release = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(WatchError::Interaction)?;
        bounded("coordinate click", async {
            page.execute(press)
                .await
                .map_err(|e| WatchError::Interaction(format!("mouse press failed: {e}")))?;
            page.execute(release)
                .await
                .map_err(|e| WatchError::Interaction(format!("mouse release failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: &str) -> Result<(), WatchError> {
        let page = self.page().await?;
        let down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key(key.to_string())
            .build()
            .map_err(WatchError::Interaction)?;
        let up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key.to_string())
            .build()
            .map_err(WatchError::Interaction)?;
        bounded("key press", async {
            page.execute(down)
                .await
                .map_err(|e| WatchError::Interaction(format!("key down failed: {e}")))?;
            page.execute(up)
                .await
                .map_err(|e| WatchError::Interaction(format!("key up failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), WatchError> {
        let page = self.page().await?;
        bounded("fill", async {
            let element = page
                .find_element(selector)
                .await
                .map_err(|e| WatchError::ElementNotFound(format!("{selector}: {e}")))?;
            element
                .click()
                .await
                .map_err(|e| WatchError::Interaction(format!("focus on {selector} failed: {e}")))?;
            page.evaluate(scripts::set_field_value(selector, value))
                .await
                .map_err(|e| WatchError::Script(format!("value set on {selector} failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn type_chars(
        &self,
        selector: &str,
        value: &str,
        delay: Duration,
    ) -> Result<(), WatchError> {
        let page = self.page().await?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|e| WatchError::ElementNotFound(format!("{selector}: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| WatchError::Interaction(format!("focus on {selector} failed: {e}")))?;
        for c in value.chars() {
            element
                .type_str(&c.to_string())
                .await
                .map_err(|e| WatchError::Interaction(format!("typing into {selector} failed: {e}")))?;
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn field_value(&self, selector: &str) -> Result<String, WatchError> {
        let value = self.eval(&scripts::get_field_value(selector)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn eval(&self, script: &str) -> Result<Value, WatchError> {
        let page = self.page().await?;
        let script = script.to_string();
        bounded("script evaluation", async {
            let result = page
                .evaluate(script)
                .await
                .map_err(|e| WatchError::Script(format!("evaluation failed: {e}")))?;
            Ok(result.into_value().unwrap_or(Value::Null))
        })
        .await
    }

    async fn screenshot(&self, path: &Path) -> Result<(), WatchError> {
        let page = self.page().await?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        let png = bounded("screenshot", async {
            page.screenshot(params)
                .await
                .map_err(|e| WatchError::Screenshot(format!("capture failed: {e}")))
        })
        .await?;
        tokio::fs::write(path, png)
            .await
            .map_err(|e| WatchError::Screenshot(format!("write to {} failed: {e}", path.display())))
    }

    async fn clear_cookies(&self) -> Result<(), WatchError> {
        let page = self.page().await?;
        bounded("cookie clear", async {
            page.execute(ClearBrowserCookiesParams::default())
                .await
                .map_err(|e| WatchError::Script(format!("cookie clear failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn reset_context(&self) -> Result<(), WatchError> {
        let browser_guard = self.browser.lock().await;
        let browser = browser_guard.as_ref().ok_or(WatchError::SessionClosed)?;

        let mut page_guard = self.page.lock().await;
        if let Some(old) = page_guard.take() {
            if let Err(e) = old.close().await {
                debug!("old page close reported: {e}");
            }
        }

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| WatchError::Navigation(format!("context recreation failed: {e}")))?;
        apply_persona(&page, &self.persona)
            .await
            .map_err(|e| WatchError::Navigation(e.to_string()))?;
        *page_guard = Some(page);
        Ok(())
    }

    async fn close(&self) -> Result<(), WatchError> {
        if let Some(page) = self.page.lock().await.take() {
            if let Err(e) = page.close().await {
                debug!("page close reported: {e}");
            }
        }
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!("browser close reported: {e}");
            }
            if let Err(e) = browser.wait().await {
                debug!("browser wait reported: {e}");
            }
        }
        if let Ok(mut guard) = self.handler_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
        Ok(())
    }
}

/// Default launcher handed to the monitoring driver.
pub struct ChromiumLauncher;

#[async_trait]
impl EngineLauncher for ChromiumLauncher {
    async fn launch(
        &self,
        config: &EngineConfig,
    ) -> Result<Arc<dyn BrowserEngine>, WatchError> {
        Ok(Arc::new(ChromiumEngine::launch(config).await?))
    }
}
