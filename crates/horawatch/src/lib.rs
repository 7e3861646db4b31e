//! Appointment-slot watching through browser automation
//!
//! This crate keeps a long-running, unattended browser session correct while
//! a government booking site throws session-expiry popups, loading
//! placeholders and transient server errors at it, and classifies what the
//! resulting pages mean. The browser itself sits behind the narrow
//! [`BrowserEngine`] trait, inspired by Playwright's page model, so the
//! whole control policy runs unchanged against a scripted fake in tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

pub mod classify;
pub mod config;
pub mod decision;
pub mod engine;
pub mod engines;
pub mod errors;
pub mod flow;
pub mod interstitial;
pub mod monitor;
pub mod rules;
pub mod rut;
mod scripts;

pub use classify::{
    AvailabilityEvidence, Classifier, ContentReason, DomProbe, ErrorKind, Outcome, Verdict,
};
pub use config::WatchConfig;
pub use decision::{
    ControlAction, DecisionEngine, ManualChoice, MenuChoice, OperatorPrompt, RunMode,
};
pub use engine::{BrowserEngine, BrowserKind, EngineConfig, EngineLauncher, Persona};
pub use errors::WatchError;
pub use interstitial::InterstitialGuard;
pub use monitor::Monitor;
pub use rules::RuleSet;
pub use rut::Rut;

/// Default bound for navigation quiescence waits.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// One owned browser session with a single page.
///
/// The monitoring driver owns exactly one of these at a time and may destroy
/// and recreate it between attempts to invalidate client-side state.
#[derive(Clone)]
pub struct Session {
    engine: Arc<dyn BrowserEngine>,
    screenshot_dir: PathBuf,
}

impl Session {
    pub fn new(engine: Arc<dyn BrowserEngine>, screenshot_dir: impl Into<PathBuf>) -> Self {
        Self { engine, screenshot_dir: screenshot_dir.into() }
    }

    /// Navigate and wait for network activity to settle.
    #[instrument(skip(self))]
    pub async fn navigate(&self, url: &str) -> Result<(), WatchError> {
        info!("🔗 navigating to {url}");
        self.engine.goto(url).await?;
        self.engine.wait_for_quiescence(NAVIGATION_TIMEOUT).await
    }

    pub async fn wait_for_quiescence(&self, timeout: Duration) -> Result<(), WatchError> {
        self.engine.wait_for_quiescence(timeout).await
    }

    pub async fn current_url(&self) -> Result<String, WatchError> {
        self.engine.current_url().await
    }

    pub async fn content(&self) -> Result<String, WatchError> {
        self.engine.content().await
    }

    pub async fn exists(&self, selector: &str) -> Result<bool, WatchError> {
        self.engine.exists(selector).await
    }

    pub async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, WatchError> {
        self.engine.wait_for_selector(selector, timeout).await
    }

    pub async fn click(&self, selector: &str) -> Result<(), WatchError> {
        debug!(selector, "clicking");
        self.engine.click(selector).await
    }

    pub async fn click_at(&self, x: f64, y: f64) -> Result<(), WatchError> {
        self.engine.click_at(x, y).await
    }

    pub async fn press_key(&self, key: &str) -> Result<(), WatchError> {
        self.engine.press_key(key).await
    }

    pub async fn fill(&self, selector: &str, value: &str) -> Result<(), WatchError> {
        self.engine.fill(selector, value).await
    }

    pub async fn type_chars(
        &self,
        selector: &str,
        value: &str,
        delay: Duration,
    ) -> Result<(), WatchError> {
        self.engine.type_chars(selector, value, delay).await
    }

    pub async fn field_value(&self, selector: &str) -> Result<String, WatchError> {
        self.engine.field_value(selector).await
    }

    pub async fn eval(&self, script: &str) -> Result<Value, WatchError> {
        self.engine.eval(script).await
    }

    /// Best-effort screenshot named by phase and UTC timestamp. Failures are
    /// logged and swallowed; observability must never break the run.
    pub async fn screenshot_phase(&self, phase: &str) -> Option<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.screenshot_dir.join(format!("screenshot_{phase}_{stamp}.png"));
        match self.engine.screenshot(&path).await {
            Ok(()) => {
                info!("📸 screenshot saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("screenshot for phase {phase} failed: {e}");
                None
            }
        }
    }

    /// Aggressively clear client-side state: web storage, autofilled fields
    /// and cookies. Best-effort; failures are logged and ignored.
    pub async fn clear_browsing_data(&self) {
        debug!("🧹 clearing browser data");
        if let Err(e) = self.engine.eval(&scripts::clear_storage()).await {
            warn!("storage clear failed: {e}");
        }
        if let Err(e) = self.engine.clear_cookies().await {
            warn!("cookie clear failed: {e}");
        }
    }

    /// Replace the page with a fresh one to drop any cached state.
    pub async fn reset_context(&self) -> Result<(), WatchError> {
        info!("🔄 recreating browser context");
        self.engine.reset_context().await
    }

    /// Tear the session down. Idempotent and best-effort.
    pub async fn close(&self) {
        if let Err(e) = self.engine.close().await {
            warn!("session teardown reported: {e}");
        }
    }
}

#[async_trait]
impl DomProbe for Session {
    async fn visible_texts(&self, selectors: &[String]) -> Result<Vec<String>, WatchError> {
        let value = self.engine.eval(&scripts::error_texts(selectors)).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn first_present(&self, selectors: &[String]) -> Result<Option<String>, WatchError> {
        for selector in selectors {
            if self.engine.exists(selector).await? {
                return Ok(Some(selector.clone()));
            }
        }
        Ok(None)
    }
}
