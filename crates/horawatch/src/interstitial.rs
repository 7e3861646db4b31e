//! Detection and dismissal of blocking overlays.
//!
//! Dismissal is best-effort by contract: the guard reports whether an
//! overlay was present, escalating through dismissal strategies without ever
//! raising. A popup that survives every strategy still yields `true`, and
//! the caller retries its action.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::rules::OverlayRules;
use crate::scripts;
use crate::Session;

/// Settle delay after each dismissal attempt.
const SETTLE: Duration = Duration::from_millis(500);
/// Extra settle once an overlay has been handled, before the caller resumes.
const POST_DISMISS: Duration = Duration::from_millis(1000);

pub struct InterstitialGuard {
    rules: OverlayRules,
}

impl InterstitialGuard {
    pub fn new(rules: OverlayRules) -> Self {
        Self { rules }
    }

    /// Check for a visible blocking overlay and try to dismiss it.
    ///
    /// Returns `true` iff an overlay was present, regardless of whether any
    /// dismissal strategy worked. Never errors.
    pub async fn detect_and_dismiss(&self, session: &Session) -> bool {
        if !self.overlay_visible(session).await {
            debug!("no blocking overlay present");
            return false;
        }

        warn!("🚨 blocking overlay detected, attempting dismissal");
        self.dismiss(session).await;
        tokio::time::sleep(POST_DISMISS).await;
        true
    }

    async fn overlay_visible(&self, session: &Session) -> bool {
        let script = scripts::overlay_probe(&self.rules.overlay_selectors);
        match session.eval(&script).await {
            Ok(value) => value.get("found").and_then(|v| v.as_bool()).unwrap_or(false),
            Err(e) => {
                // A failed probe is treated as "no overlay"; the next guard
                // pass will look again.
                debug!("overlay probe failed: {e}");
                false
            }
        }
    }

    /// Escalate through dismissal strategies until one plausibly lands.
    async fn dismiss(&self, session: &Session) {
        // 1. A recognized close control inside the overlay.
        let close = scripts::overlay_close_click(
            &self.rules.overlay_selectors,
            &self.rules.close_control_selectors,
            &self.rules.close_control_texts,
        );
        if let Ok(value) = session.eval(&close).await {
            if value.get("clicked").and_then(|v| v.as_bool()).unwrap_or(false) {
                let control = value.get("control").and_then(|v| v.as_str()).unwrap_or("?");
                info!("overlay closed via control {control}");
                tokio::time::sleep(SETTLE).await;
                return;
            }
        }

        // 2. Escape.
        debug!("no close control, sending Escape");
        if let Err(e) = session.press_key("Escape").await {
            debug!("escape dispatch failed: {e}");
        }
        tokio::time::sleep(SETTLE).await;
        if !self.overlay_visible(session).await {
            info!("overlay closed via Escape");
            return;
        }

        // 3. Click outside the overlay bounds.
        debug!("overlay still visible, clicking outside it");
        if let Err(e) = session.click_at(10.0, 10.0).await {
            debug!("outside click failed: {e}");
        }
        tokio::time::sleep(SETTLE).await;

        // 4. Force-hide the overlay and strip backdrops.
        debug!("force-hiding overlay");
        let force = scripts::overlay_force_hide(
            &self.rules.overlay_selectors,
            &self.rules.backdrop_selectors,
        );
        match session.eval(&force).await {
            Ok(value) => {
                let hidden = value.get("hidden").and_then(|v| v.as_u64()).unwrap_or(0);
                let removed = value.get("removed").and_then(|v| v.as_u64()).unwrap_or(0);
                info!("force-hid {hidden} overlay(s), removed {removed} backdrop(s)");
            }
            Err(e) => warn!("forced overlay removal failed: {e}"),
        }
        tokio::time::sleep(SETTLE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::mock::{MockEngine, MockState};
    use serde_json::json;
    use std::sync::Arc;

    fn session(engine: MockEngine) -> Session {
        Session::new(Arc::new(engine), std::env::temp_dir())
    }

    #[tokio::test]
    async fn no_overlay_returns_false() {
        let engine = MockEngine::new(MockState::default()).with_eval(|script, _| {
            if script.contains("const overlaySelectors") {
                json!({ "found": false, "matches": [] })
            } else {
                json!(null)
            }
        });
        let guard = InterstitialGuard::new(OverlayRules::default());
        assert!(!guard.detect_and_dismiss(&session(engine)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn visible_dialog_without_close_control_still_returns_true() {
        // Every probe keeps reporting the overlay and no strategy can land;
        // the guard must still report presence and not error.
        let engine = MockEngine::new(MockState::default()).with_eval(|script, _| {
            if script.contains("const closeSelectors") {
                json!({ "clicked": false, "control": null })
            } else if script.contains("const backdropSelectors") {
                json!({ "hidden": 1, "removed": 0 })
            } else if script.contains("const overlaySelectors") {
                json!({ "found": true, "matches": ["[role=\"dialog\"]"] })
            } else {
                json!(null)
            }
        });
        let guard = InterstitialGuard::new(OverlayRules::default());
        assert!(guard.detect_and_dismiss(&session(engine)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_control_short_circuits_escalation() {
        let engine = MockEngine::new(MockState::default()).with_eval(|script, _| {
            if script.contains("const closeSelectors") {
                json!({ "clicked": true, "control": ".btn-close" })
            } else if script.contains("const overlaySelectors") {
                json!({ "found": true, "matches": [".modal"] })
            } else {
                json!(null)
            }
        });
        let handle = engine.state_handle();
        let guard = InterstitialGuard::new(OverlayRules::default());
        assert!(guard.detect_and_dismiss(&session(engine)).await);
        // Escape is never sent when the close control handled it.
        assert!(handle.lock().unwrap().keys.is_empty());
    }

    #[tokio::test]
    async fn failing_probe_is_treated_as_clear() {
        let engine = MockEngine::new(MockState::default())
            .with_eval(|_, _| json!("not-an-object"));
        let guard = InterstitialGuard::new(OverlayRules::default());
        assert!(!guard.detect_and_dismiss(&session(engine)).await);
    }
}
