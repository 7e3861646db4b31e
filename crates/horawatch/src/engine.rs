//! The narrow surface the watcher needs from a browser automation backend.
//!
//! Everything above this trait is engine-agnostic: the bundled implementation
//! drives a real Chromium over CDP (see [`engines::chromium`]), and tests
//! substitute [`engines::mock::MockEngine`] to script page behavior without a
//! live browser.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WatchError;

/// Which browser binary the engine should drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chromium,
    Firefox,
    Webkit,
}

impl FromStr for BrowserKind {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" => Ok(BrowserKind::Webkit),
            other => Err(WatchError::InvalidConfig(format!(
                "unknown browser type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserKind::Chromium => write!(f, "chromium"),
            BrowserKind::Firefox => write!(f, "firefox"),
            BrowserKind::Webkit => write!(f, "webkit"),
        }
    }
}

/// Client-side identity presented to the target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            viewport_width: 1366,
            viewport_height: 768,
            locale: "es-CL".to_string(),
        }
    }
}

/// Launch-time options for a browser engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kind: BrowserKind,
    pub headless: bool,
    pub persona: Persona,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chromium,
            headless: false,
            persona: Persona::default(),
        }
    }
}

/// One live browser session with a single page.
///
/// All interactions are bounded by finite timeouts even though the retry
/// loops above them are not. Teardown must be idempotent.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Navigate the page and wait for the load event.
    async fn goto(&self, url: &str) -> Result<(), WatchError>;

    /// Wait until network activity settles, bounded by `timeout`.
    async fn wait_for_quiescence(&self, timeout: Duration) -> Result<(), WatchError>;

    async fn current_url(&self) -> Result<String, WatchError>;

    /// Full HTML content of the current page.
    async fn content(&self) -> Result<String, WatchError>;

    /// Whether any element matches the CSS selector right now.
    async fn exists(&self, selector: &str) -> Result<bool, WatchError>;

    /// Poll for a selector to appear, up to `timeout`. Returns false on expiry.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, WatchError>;

    /// Dispatch a native click on the first element matching the selector.
    async fn click(&self, selector: &str) -> Result<(), WatchError>;

    /// Dispatch a native click at viewport coordinates.
    async fn click_at(&self, x: f64, y: f64) -> Result<(), WatchError>;

    /// Send a key (e.g. "Escape", "Delete", "Backspace") to the page.
    async fn press_key(&self, key: &str) -> Result<(), WatchError>;

    /// Set a form field's value, firing input/change events.
    async fn fill(&self, selector: &str, value: &str) -> Result<(), WatchError>;

    /// Type into a field character by character with a delay between keys.
    async fn type_chars(
        &self,
        selector: &str,
        value: &str,
        delay: Duration,
    ) -> Result<(), WatchError>;

    /// Read a form field's current value.
    async fn field_value(&self, selector: &str) -> Result<String, WatchError>;

    /// Evaluate an inline page script and return its JSON result.
    async fn eval(&self, script: &str) -> Result<Value, WatchError>;

    /// Capture a full-page screenshot to `path`.
    async fn screenshot(&self, path: &Path) -> Result<(), WatchError>;

    /// Clear cookies for the session.
    async fn clear_cookies(&self) -> Result<(), WatchError>;

    /// Replace the page with a fresh one, dropping client-side state.
    async fn reset_context(&self) -> Result<(), WatchError>;

    /// Tear down the session. Safe to call more than once.
    async fn close(&self) -> Result<(), WatchError>;
}

/// Creates engine sessions. The monitoring driver goes through this seam so
/// tests can hand it a scripted engine instead of a real browser.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(
        &self,
        config: &EngineConfig,
    ) -> Result<std::sync::Arc<dyn BrowserEngine>, WatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_kind_parses_aliases() {
        assert_eq!("chromium".parse::<BrowserKind>().unwrap(), BrowserKind::Chromium);
        assert_eq!("Chrome".parse::<BrowserKind>().unwrap(), BrowserKind::Chromium);
        assert_eq!("firefox".parse::<BrowserKind>().unwrap(), BrowserKind::Firefox);
        assert_eq!("WEBKIT".parse::<BrowserKind>().unwrap(), BrowserKind::Webkit);
        assert!("safari".parse::<BrowserKind>().is_err());
    }

    #[test]
    fn default_persona_matches_target_site() {
        let persona = Persona::default();
        assert_eq!(persona.locale, "es-CL");
        assert_eq!((persona.viewport_width, persona.viewport_height), (1366, 768));
    }
}
