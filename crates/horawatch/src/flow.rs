//! Step choreography for the booking flow: filling the identifier form and
//! the click-until-clear loop that advances past the specialties step.
//!
//! The retry loop is unbounded by design. The target site times out and
//! rate-limits sessions spuriously, so a failed attempt is never grounds for
//! giving up; only a definitive observation or an external cancellation ends
//! it. Each iteration is bounded: every interaction inside it carries a
//! finite timeout.

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{Classifier, ErrorKind, Outcome};
use crate::errors::WatchError;
use crate::interstitial::InterstitialGuard;
use crate::rut::Rut;
use crate::scripts;
use crate::{Session, NAVIGATION_TIMEOUT};

/// Selectors for the identifier field, in preference order.
pub const IDENTIFIER_FIELD_SELECTORS: &[&str] = &[
    "input[name=\"txtRut\"]",
    "input[id=\"txtRut\"]",
    "input[type=\"text\"]",
    "#txtRut",
];

/// Selectors for the identifier form's submit control, in preference order.
pub const SUBMIT_SELECTORS: &[&str] = &[
    "input[type=\"submit\"]",
    "button[type=\"submit\"]",
    "input[value=\"ingresar\"]",
    "#btnIngresar",
    ".btn-submit",
];

const LOCATE_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_LOCATE_TIMEOUT: Duration = Duration::from_secs(3);
const RETRY_DELAY: Duration = Duration::from_secs(3);
const POST_OVERLAY_DELAY: Duration = Duration::from_secs(2);
const FIELD_SETTLE: Duration = Duration::from_millis(300);

/// The control that advances from the step page into the slot listing.
#[derive(Debug, Clone)]
pub struct StepTarget {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl Default for StepTarget {
    fn default() -> Self {
        Self {
            primary: "#dgGrilla_btIngresar_0".to_string(),
            fallbacks: [
                "input[id=\"dgGrilla_btIngresar_0\"]",
                "input[name=\"dgGrilla$ctl02$btIngresar\"]",
                ".BotonIngresar",
                "input.BotonIngresar",
                "table input[id*=\"btIngresar\"]",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Result of one attempt inside an unbounded retry loop.
#[derive(Debug)]
pub enum RetryCycle {
    /// This attempt did not complete; run the whole cycle again.
    Continue,
    /// A definitive observation ends the loop.
    Done(Outcome),
}

/// Drive the step transition until it yields a definitive [`Outcome`].
///
/// The only exits are a definitive observation or cancellation; transient
/// errors and interstitials feed back into the next attempt. Returns
/// `Err(WatchError::Cancelled)` when the token fires.
pub async fn advance_step(
    session: &Session,
    guard: &InterstitialGuard,
    classifier: &Classifier,
    target: &StepTarget,
    cancel: &CancellationToken,
) -> Result<Outcome, WatchError> {
    let mut attempt: u64 = 0;
    info!("🔁 entering retry loop for the step control (unbounded, Ctrl+C to stop)");

    loop {
        if cancel.is_cancelled() {
            return Err(WatchError::Cancelled);
        }
        attempt += 1;
        debug!(attempt, "attempting step advance");

        match try_advance_once(session, guard, classifier, target, attempt).await {
            RetryCycle::Done(outcome) => {
                info!("✅ step resolved after {attempt} attempt(s)");
                return Ok(outcome);
            }
            RetryCycle::Continue => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WatchError::Cancelled),
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
}

/// One bounded attempt. Every fault inside it maps to `Continue`; nothing
/// here can abort the loop.
async fn try_advance_once(
    session: &Session,
    guard: &InterstitialGuard,
    classifier: &Classifier,
    target: &StepTarget,
    attempt: u64,
) -> RetryCycle {
    let selector = match locate_step_control(session, target).await {
        Some(selector) => selector,
        None => {
            warn!("step control not found on attempt #{attempt}, retrying");
            return RetryCycle::Continue;
        }
    };

    // An overlay in front of the control would swallow the click.
    guard.detect_and_dismiss(session).await;

    info!("🖱️ clicking step control {selector} (attempt #{attempt})");
    if let Err(e) = session.click(&selector).await {
        warn!("click failed: {e}");
        return RetryCycle::Continue;
    }

    if let Err(e) = session.wait_for_quiescence(NAVIGATION_TIMEOUT).await {
        warn!("post-click quiescence wait: {e}");
    }

    // A dismissed overlay here means the click's effect was interrupted,
    // not that the step failed.
    if guard.detect_and_dismiss(session).await {
        warn!("overlay appeared after the click on attempt #{attempt}, retrying");
        tokio::time::sleep(POST_OVERLAY_DELAY).await;
        return RetryCycle::Continue;
    }

    session.screenshot_phase("after_click").await;

    let outcome = observe(session, classifier).await;
    if outcome.is_transient_error() {
        warn!("transient error after click: {}", outcome.message);
        return RetryCycle::Continue;
    }

    RetryCycle::Done(outcome)
}

/// Find the step control by primary selector, then fallbacks.
async fn locate_step_control(session: &Session, target: &StepTarget) -> Option<String> {
    match session.wait_for_selector(&target.primary, LOCATE_TIMEOUT).await {
        Ok(true) => return Some(target.primary.clone()),
        Ok(false) => {
            debug!("primary step selector {} not present", target.primary)
        }
        Err(e) => debug!("primary step selector lookup failed: {e}"),
    }

    for fallback in &target.fallbacks {
        match session.wait_for_selector(fallback, FALLBACK_LOCATE_TIMEOUT).await {
            Ok(true) => {
                info!("using fallback step selector {fallback}");
                return Some(fallback.clone());
            }
            Ok(false) => {}
            Err(e) => debug!("fallback selector {fallback} lookup failed: {e}"),
        }
    }

    None
}

/// Classify whatever the page currently shows. Fetch failures become an
/// unknown error outcome instead of propagating.
pub async fn observe(session: &Session, classifier: &Classifier) -> Outcome {
    let url = match session.current_url().await {
        Ok(url) => url,
        Err(e) => {
            return Outcome::error(ErrorKind::Unknown, "", format!("could not read URL: {e}"))
        }
    };
    let html = match session.content().await {
        Ok(html) => html,
        Err(e) => {
            return Outcome::error(
                ErrorKind::Unknown,
                url,
                format!("could not read page content: {e}"),
            )
        }
    };
    classifier.classify(&url, &html, session).await
}

/// Fill the identifier form and submit it, with the guard run before and
/// after every action that could be intercepted.
pub async fn fill_identifier_form(
    session: &Session,
    guard: &InterstitialGuard,
    rut: &Rut,
) -> Result<(), WatchError> {
    guard.detect_and_dismiss(session).await;

    let field = find_first(session, IDENTIFIER_FIELD_SELECTORS).await.ok_or_else(|| {
        WatchError::ElementNotFound("identifier input field".to_string())
    })?;

    info!("📝 entering identifier into {field}");
    clear_field(session, &field).await;

    session.fill(&field, rut.as_str()).await?;
    tokio::time::sleep(FIELD_SETTLE).await;

    // The site re-formats the field from script; verify what actually stuck.
    let mut value = session.field_value(&field).await.unwrap_or_default();
    if value != rut.as_str() {
        warn!("field readback was {value:?}, retyping character by character");
        clear_field(session, &field).await;
        session.type_chars(&field, rut.as_str(), Duration::from_millis(100)).await?;
        tokio::time::sleep(FIELD_SETTLE).await;
        value = session.field_value(&field).await.unwrap_or_default();
        if value != rut.as_str() {
            return Err(WatchError::Interaction(format!(
                "identifier field kept value {value:?} instead of {}",
                rut.as_str()
            )));
        }
    }

    guard.detect_and_dismiss(session).await;

    let submit = find_first(session, SUBMIT_SELECTORS)
        .await
        .ok_or_else(|| WatchError::ElementNotFound("submit control".to_string()))?;

    info!("🔄 submitting identifier form via {submit}");
    session.click(&submit).await?;
    if let Err(e) = session.wait_for_quiescence(NAVIGATION_TIMEOUT).await {
        warn!("post-submit quiescence wait: {e}");
    }

    guard.detect_and_dismiss(session).await;
    Ok(())
}

/// Empty a field that may resist clearing: scripted reset first, per-char
/// backspace as the last resort.
async fn clear_field(session: &Session, field: &str) {
    let _ = session.click(field).await;
    tokio::time::sleep(FIELD_SETTLE).await;

    let current = session.field_value(field).await.unwrap_or_default();
    if current.trim().is_empty() {
        return;
    }

    debug!("field holds {current:?}, forcing scripted clear");
    let _ = session.eval(&scripts::set_field_value(field, "")).await;
    tokio::time::sleep(FIELD_SETTLE).await;

    let still = session.field_value(field).await.unwrap_or_default();
    if !still.trim().is_empty() {
        warn!("field refused scripted clear, backspacing {} characters", still.chars().count());
        for _ in 0..still.chars().count() + 5 {
            let _ = session.press_key("Backspace").await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

async fn find_first(session: &Session, selectors: &[&str]) -> Option<String> {
    for (i, selector) in selectors.iter().enumerate() {
        let timeout = if i == 0 { LOCATE_TIMEOUT } else { FALLBACK_LOCATE_TIMEOUT };
        match session.wait_for_selector(selector, timeout).await {
            Ok(true) => return Some(selector.to_string()),
            Ok(false) => {}
            Err(e) => debug!("selector {selector} lookup failed: {e}"),
        }
    }
    None
}

/// What the specialties status page currently shows.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusReport {
    pub loading: bool,
    pub errors: Vec<String>,
    pub has_table: bool,
    pub has_modify_column: bool,
    pub button_count: u32,
    pub specialties: Vec<Specialty>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Specialty {
    pub id: String,
    pub cells: Vec<String>,
}

/// Probe the status page, waiting out its "searching specialties" loading
/// placeholder once before reporting.
pub async fn inspect_status_page(session: &Session) -> StatusReport {
    let mut report = probe_status(session).await;

    if report.loading {
        info!("⏳ status page is still searching for specialties, waiting");
        tokio::time::sleep(Duration::from_secs(3)).await;
        report = probe_status(session).await;
    }

    if !report.errors.is_empty() {
        warn!("status page shows {} error text(s)", report.errors.len());
    }
    for (i, specialty) in report.specialties.iter().enumerate() {
        info!("specialty {}: {} {:?}", i + 1, specialty.id, specialty.cells);
    }

    report
}

async fn probe_status(session: &Session) -> StatusReport {
    match session.eval(&scripts::status_page_probe()).await {
        Ok(value) => serde_json::from_value(value).unwrap_or_default(),
        Err(e) => {
            warn!("status page probe failed: {e}");
            StatusReport::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::mock::{MockEngine, MockState};
    use crate::classify::{ContentReason, Verdict};
    use crate::rules::{ClassifierRules, OverlayRules};
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn fixtures() -> (InterstitialGuard, Classifier) {
        (
            InterstitialGuard::new(OverlayRules::default()),
            Classifier::new(ClassifierRules::default()).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn loop_outlives_a_finite_run_of_overlays() {
        // Overlay probes report a popup for a while, then the page clears and
        // classification must be reached.
        let mut state = MockState::default();
        state.url = "https://example.cl/paso-2.aspx".to_string();
        state.html = "<html><body>no existen horas disponibles</body></html>".to_string();
        state.present_selectors.insert("#dgGrilla_btIngresar_0".to_string());

        let rounds_left = Arc::new(AtomicI32::new(5));
        let rounds_probe = rounds_left.clone();
        let engine = MockEngine::new(state).with_eval(move |script, _| {
            if script.contains("const closeSelectors") {
                json!({ "clicked": false, "control": null })
            } else if script.contains("const backdropSelectors") {
                json!({ "hidden": 1, "removed": 0 })
            } else if script.contains("const overlaySelectors") {
                let remaining = rounds_probe.fetch_sub(1, Ordering::SeqCst);
                json!({ "found": remaining > 0, "matches": [".modal"] })
            } else if script.contains("const errorSelectors") {
                json!([])
            } else {
                json!(null)
            }
        });

        let session = Session::new(Arc::new(engine), std::env::temp_dir());
        let (guard, classifier) = fixtures();
        let cancel = CancellationToken::new();

        let outcome = advance_step(&session, &guard, &classifier, &StepTarget::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(
            outcome.verdict,
            Verdict::Unavailable { reason: ContentReason::ContentKeyword }
        );
    }

    #[tokio::test]
    async fn cancellation_is_observed_at_the_loop_head() {
        let engine = MockEngine::new(MockState::default()).with_eval(|_, _| json!(null));
        let session = Session::new(Arc::new(engine), std::env::temp_dir());
        let (guard, classifier) = fixtures();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            advance_step(&session, &guard, &classifier, &StepTarget::default(), &cancel).await;
        assert!(matches!(result, Err(WatchError::Cancelled)));
    }

    #[tokio::test]
    async fn fallback_selector_is_used_when_primary_is_missing() {
        let mut state = MockState::default();
        state.url = "https://example.cl/paso-2.aspx".to_string();
        state.html = "<html><body>seleccione fecha</body></html>".to_string();
        state.present_selectors.insert(".BotonIngresar".to_string());

        let engine = MockEngine::new(state).with_eval(|script, _| {
            if script.contains("const overlaySelectors") {
                json!({ "found": false, "matches": [] })
            } else if script.contains("const errorSelectors") {
                json!([])
            } else {
                json!(null)
            }
        });
        let handle = engine.state_handle();

        let session = Session::new(Arc::new(engine), std::env::temp_dir());
        let (guard, classifier) = fixtures();
        let cancel = CancellationToken::new();

        let outcome = advance_step(&session, &guard, &classifier, &StepTarget::default(), &cancel)
            .await
            .unwrap();
        assert!(outcome.is_available());
        assert_eq!(handle.lock().unwrap().clicks, vec![".BotonIngresar"]);
    }

    #[tokio::test(start_paused = true)]
    async fn form_fill_verifies_the_field_round_trip() {
        let mut state = MockState::default();
        for sel in ["input[name=\"txtRut\"]", "input[type=\"submit\"]"] {
            state.present_selectors.insert(sel.to_string());
        }
        let engine = MockEngine::new(state).with_eval(|script, _| {
            if script.contains("const overlaySelectors") {
                json!({ "found": false, "matches": [] })
            } else {
                json!(null)
            }
        });
        let handle = engine.state_handle();

        let session = Session::new(Arc::new(engine), std::env::temp_dir());
        let guard = InterstitialGuard::new(OverlayRules::default());
        let rut = Rut::parse("18977386-2").unwrap();

        fill_identifier_form(&session, &guard, &rut).await.unwrap();

        let state = handle.lock().unwrap();
        assert_eq!(
            state.field_values.get("input[name=\"txtRut\"]").map(String::as_str),
            Some("18977386-2")
        );
        assert!(state.clicks.contains(&"input[type=\"submit\"]".to_string()));
    }

    #[tokio::test]
    async fn missing_identifier_field_is_reported_not_retried() {
        let engine = MockEngine::new(MockState::default()).with_eval(|script, _| {
            if script.contains("const overlaySelectors") {
                json!({ "found": false, "matches": [] })
            } else {
                json!(null)
            }
        });
        let session = Session::new(Arc::new(engine), std::env::temp_dir());
        let guard = InterstitialGuard::new(OverlayRules::default());
        let rut = Rut::parse("18977386-2").unwrap();

        let result = fill_identifier_form(&session, &guard, &rut).await;
        assert!(matches!(result, Err(WatchError::ElementNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn status_report_parses_probe_json() {
        let engine = MockEngine::new(MockState::default()).with_eval(|script, _| {
            if script.contains("buscando especialidades") {
                json!({
                    "loading": false,
                    "errors": ["Atención! Error: estado inválido"],
                    "hasTable": true,
                    "hasModifyColumn": true,
                    "buttonCount": 1,
                    "specialties": [{ "id": "dgGrilla_btIngresar_0", "cells": ["Licencia clase B"] }]
                })
            } else {
                json!(null)
            }
        });
        let session = Session::new(Arc::new(engine), std::env::temp_dir());
        let report = inspect_status_page(&session).await;
        assert!(report.has_table);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.specialties[0].id, "dgGrilla_btIngresar_0");
    }
}
