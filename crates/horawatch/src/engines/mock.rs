//! A scripted stand-in for a live browser.
//!
//! Tests preload page state and an eval handler, then assert on the recorded
//! interactions. The handler receives the script text and may mutate the
//! state, which is how tests simulate pages that change under the watcher
//! (overlays that go away, content that appears after a click).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::BrowserEngine;
use crate::errors::WatchError;

type EvalFn = dyn Fn(&str, &mut MockState) -> Value + Send + Sync;

/// Observable and scriptable session state.
#[derive(Debug, Default, Clone)]
pub struct MockState {
    pub url: String,
    pub html: String,
    /// Selectors `exists`/`wait_for_selector`/`click`/`fill` will find.
    pub present_selectors: HashSet<String>,
    pub field_values: HashMap<String, String>,
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub coordinate_clicks: Vec<(f64, f64)>,
    pub keys: Vec<String>,
    pub screenshots: u32,
    pub cookie_clears: u32,
    pub context_resets: u32,
    pub closed: bool,
}

pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
    eval_fn: Box<EvalFn>,
}

impl MockEngine {
    pub fn new(state: MockState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            eval_fn: Box::new(|_, _| Value::Null),
        }
    }

    /// Install a handler for `eval` calls. The handler sees the script text
    /// and the mutable state.
    pub fn with_eval(
        mut self,
        f: impl Fn(&str, &mut MockState) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.eval_fn = Box::new(f);
        self
    }

    /// Handle for asserting on state after the engine moved into a session.
    pub fn state_handle(&self) -> Arc<Mutex<MockState>> {
        self.state.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

#[async_trait]
impl BrowserEngine for MockEngine {
    async fn goto(&self, url: &str) -> Result<(), WatchError> {
        let mut state = self.lock();
        state.navigations.push(url.to_string());
        state.url = url.to_string();
        Ok(())
    }

    async fn wait_for_quiescence(&self, _timeout: Duration) -> Result<(), WatchError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, WatchError> {
        Ok(self.lock().url.clone())
    }

    async fn content(&self) -> Result<String, WatchError> {
        Ok(self.lock().html.clone())
    }

    async fn exists(&self, selector: &str) -> Result<bool, WatchError> {
        Ok(self.lock().present_selectors.contains(selector))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<bool, WatchError> {
        self.exists(selector).await
    }

    async fn click(&self, selector: &str) -> Result<(), WatchError> {
        let mut state = self.lock();
        if !state.present_selectors.contains(selector) {
            return Err(WatchError::ElementNotFound(selector.to_string()));
        }
        state.clicks.push(selector.to_string());
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), WatchError> {
        self.lock().coordinate_clicks.push((x, y));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), WatchError> {
        self.lock().keys.push(key.to_string());
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), WatchError> {
        let mut state = self.lock();
        if !state.present_selectors.contains(selector) {
            return Err(WatchError::ElementNotFound(selector.to_string()));
        }
        state.field_values.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn type_chars(
        &self,
        selector: &str,
        value: &str,
        _delay: Duration,
    ) -> Result<(), WatchError> {
        self.fill(selector, value).await
    }

    async fn field_value(&self, selector: &str) -> Result<String, WatchError> {
        Ok(self.lock().field_values.get(selector).cloned().unwrap_or_default())
    }

    async fn eval(&self, script: &str) -> Result<Value, WatchError> {
        let mut state = self.lock();
        Ok((self.eval_fn)(script, &mut state))
    }

    async fn screenshot(&self, _path: &Path) -> Result<(), WatchError> {
        self.lock().screenshots += 1;
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<(), WatchError> {
        self.lock().cookie_clears += 1;
        Ok(())
    }

    async fn reset_context(&self) -> Result<(), WatchError> {
        let mut state = self.lock();
        state.context_resets += 1;
        state.field_values.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), WatchError> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_interactions() {
        let mut state = MockState::default();
        state.present_selectors.insert("#btn".to_string());
        let engine = MockEngine::new(state);
        let handle = engine.state_handle();

        engine.goto("https://example.cl").await.unwrap();
        engine.click("#btn").await.unwrap();
        assert!(engine.click("#missing").await.is_err());
        engine.press_key("Escape").await.unwrap();
        engine.close().await.unwrap();

        let state = handle.lock().unwrap();
        assert_eq!(state.navigations, vec!["https://example.cl"]);
        assert_eq!(state.clicks, vec!["#btn"]);
        assert_eq!(state.keys, vec!["Escape"]);
        assert!(state.closed);
    }

    #[tokio::test]
    async fn eval_handler_can_mutate_state() {
        let engine = MockEngine::new(MockState::default()).with_eval(|script, state| {
            if script.contains("flip") {
                state.html = "flipped".to_string();
            }
            Value::Bool(true)
        });
        engine.eval("flip the page").await.unwrap();
        assert_eq!(engine.content().await.unwrap(), "flipped");
    }
}
