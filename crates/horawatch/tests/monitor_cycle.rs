//! End-to-end check cycles driven against a scripted engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use horawatch::engines::mock::{MockEngine, MockState};
use horawatch::{
    BrowserEngine, Classifier, ContentReason, ControlAction, DecisionEngine, EngineConfig,
    EngineLauncher, ErrorKind, ManualChoice, MenuChoice, Monitor, OperatorPrompt, Outcome,
    RuleSet, RunMode, Rut, Verdict, WatchConfig, WatchError,
};

/// Hands the same scripted engine to every launch request.
struct FixedLauncher(Arc<MockEngine>);

#[async_trait]
impl EngineLauncher for FixedLauncher {
    async fn launch(&self, _config: &EngineConfig) -> Result<Arc<dyn BrowserEngine>, WatchError> {
        Ok(self.0.clone())
    }
}

struct FailingLauncher;

#[async_trait]
impl EngineLauncher for FailingLauncher {
    async fn launch(&self, _config: &EngineConfig) -> Result<Arc<dyn BrowserEngine>, WatchError> {
        Err(WatchError::Bootstrap("no browser binary on this host".to_string()))
    }
}

/// Operator that always chooses to stop.
struct StopPrompt;

impl OperatorPrompt for StopPrompt {
    fn outcome_menu(&self, _outcome: &Outcome) -> MenuChoice {
        MenuChoice::Stop
    }

    fn manual_menu(&self) -> ManualChoice {
        ManualChoice::Stop
    }
}

/// Standard eval handler: no overlays, no explicit error texts, a quiet
/// status page.
fn quiet_eval(script: &str, _state: &mut MockState) -> Value {
    if script.contains("const closeSelectors") {
        json!({ "clicked": false, "control": null })
    } else if script.contains("const backdropSelectors") {
        json!({ "hidden": 0, "removed": 0 })
    } else if script.contains("const overlaySelectors") {
        json!({ "found": false, "matches": [] })
    } else if script.contains("const errorSelectors") {
        json!([])
    } else if script.contains("buscando especialidades") {
        json!({
            "loading": false,
            "errors": [],
            "hasTable": true,
            "hasModifyColumn": true,
            "buttonCount": 1,
            "specialties": []
        })
    } else {
        json!(null)
    }
}

fn form_ready_state() -> MockState {
    let mut state = MockState::default();
    for sel in ["input[name=\"txtRut\"]", "input[type=\"submit\"]"] {
        state.present_selectors.insert(sel.to_string());
    }
    state
}

fn config_for(target_url: &str) -> WatchConfig {
    WatchConfig {
        target_url: target_url.to_string(),
        screenshot_dir: std::env::temp_dir(),
        ..WatchConfig::default()
    }
}

fn monitor_for(
    engine: Arc<MockEngine>,
    mode: RunMode,
    target_url: &str,
    cancel: CancellationToken,
) -> Monitor {
    Monitor::new(
        config_for(target_url),
        RuleSet::default(),
        mode,
        Rut::parse("18977386-2").unwrap(),
        Arc::new(FixedLauncher(engine)),
        Arc::new(StopPrompt),
        cancel,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn no_availability_content_continues_monitoring() {
    let mut state = form_ready_state();
    state.html = "<html><body>No existen horas disponibles en la especialidad</body></html>"
        .to_string();
    let engine = Arc::new(MockEngine::new(state).with_eval(quiet_eval));

    let mut monitor = monitor_for(
        engine,
        RunMode::Continuous,
        "https://tramites.example.cl/reserva/",
        CancellationToken::new(),
    );

    let outcome = monitor.check_once().await.unwrap();
    assert_eq!(
        outcome.verdict,
        Verdict::Unavailable { reason: ContentReason::ContentKeyword }
    );
    assert_eq!(
        DecisionEngine::automatic_action(&outcome),
        ControlAction::ContinueMonitoring
    );
}

#[tokio::test(start_paused = true)]
async fn status_page_advances_through_the_step_control() {
    let mut state = form_ready_state();
    state.html = "<html><body>seleccione fecha</body></html>".to_string();
    state.present_selectors.insert("#dgGrilla_btIngresar_0".to_string());
    let engine = Arc::new(MockEngine::new(state).with_eval(quiet_eval));
    let handle = engine.state_handle();

    let mut monitor = monitor_for(
        engine,
        RunMode::Continuous,
        "https://tramites.example.cl/reserva/estatus.aspx",
        CancellationToken::new(),
    );

    let outcome = monitor.check_once().await.unwrap();
    assert!(outcome.is_available(), "got {:?}", outcome.verdict);
    assert!(handle
        .lock()
        .unwrap()
        .clicks
        .contains(&"#dgGrilla_btIngresar_0".to_string()));
}

#[tokio::test(start_paused = true)]
async fn status_page_errors_map_to_a_transient_retry() {
    let mut state = form_ready_state();
    state.html = "<html><body>cargando</body></html>".to_string();
    let engine = Arc::new(MockEngine::new(state).with_eval(|script, state| {
        if script.contains("buscando especialidades") {
            json!({
                "loading": false,
                "errors": ["Atención! Error: intente nuevamente"],
                "hasTable": false,
                "hasModifyColumn": false,
                "buttonCount": 0,
                "specialties": []
            })
        } else {
            quiet_eval(script, state)
        }
    }));

    let mut monitor = monitor_for(
        engine,
        RunMode::Continuous,
        "https://tramites.example.cl/reserva/estatus.aspx",
        CancellationToken::new(),
    );

    let outcome = monitor.check_once().await.unwrap();
    match &outcome.verdict {
        Verdict::Error { kind, raw_messages } => {
            assert_eq!(*kind, ErrorKind::StatusPage);
            assert_eq!(raw_messages.len(), 1);
        }
        other => panic!("expected a status-page error, got {other:?}"),
    }
    assert_eq!(
        DecisionEngine::automatic_action(&outcome),
        ControlAction::RetryKeepSession
    );
}

#[tokio::test(start_paused = true)]
async fn second_check_recreates_the_context() {
    let mut state = form_ready_state();
    state.html = "<html><body>no existen horas disponibles</body></html>".to_string();
    let engine = Arc::new(MockEngine::new(state).with_eval(quiet_eval));
    let handle = engine.state_handle();

    let mut monitor = monitor_for(
        engine,
        RunMode::Continuous,
        "https://tramites.example.cl/reserva/",
        CancellationToken::new(),
    );

    monitor.check_once().await.unwrap();
    monitor.check_once().await.unwrap();

    let state = handle.lock().unwrap();
    assert_eq!(state.context_resets, 1, "only the second check rebuilds the context");
    assert!(state.cookie_clears >= 2);
}

#[tokio::test]
async fn bootstrap_failure_is_fatal() {
    let mut monitor = Monitor::new(
        config_for("https://tramites.example.cl/reserva/"),
        RuleSet::default(),
        RunMode::Continuous,
        Rut::parse("18977386-2").unwrap(),
        Arc::new(FailingLauncher),
        Arc::new(StopPrompt),
        CancellationToken::new(),
    )
    .unwrap();

    let result = monitor.check_once().await;
    assert!(matches!(result, Err(WatchError::Bootstrap(_))));
}

#[tokio::test(start_paused = true)]
async fn single_check_run_stops_on_operator_choice_and_cleans_up() {
    let mut state = form_ready_state();
    state.html = "<html><body>sin disponibilidad</body></html>".to_string();
    let engine = Arc::new(MockEngine::new(state).with_eval(quiet_eval));
    let handle = engine.state_handle();

    let mut monitor = monitor_for(
        engine,
        RunMode::SingleCheck,
        "https://tramites.example.cl/reserva/",
        CancellationToken::new(),
    );

    monitor.run().await.unwrap();

    assert!(handle.lock().unwrap().closed, "session must be torn down on stop");
    assert!(monitor.state().last_outcome.is_some());
}

#[tokio::test]
async fn pre_cancelled_run_exits_immediately() {
    let engine = Arc::new(MockEngine::new(MockState::default()).with_eval(quiet_eval));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut monitor = monitor_for(
        engine,
        RunMode::Continuous,
        "https://tramites.example.cl/reserva/",
        cancel,
    );

    monitor.run().await.unwrap();
    assert_eq!(monitor.state().attempts, 0, "no check may start after cancellation");
}

#[tokio::test(start_paused = true)]
async fn classifier_priority_holds_through_a_full_cycle() {
    // Error banner and availability keyword on the same page: the banner wins.
    let mut state = form_ready_state();
    state.html = "<b>Atención! Error: Ud. ha excedido el tiempo máximo de espera</b> \
                  <p>seleccione fecha</p>"
        .to_string();
    let engine = Arc::new(MockEngine::new(state).with_eval(quiet_eval));

    let mut monitor = monitor_for(
        engine,
        RunMode::Continuous,
        "https://tramites.example.cl/reserva/",
        CancellationToken::new(),
    );

    let outcome = monitor.check_once().await.unwrap();
    match &outcome.verdict {
        Verdict::Error { kind, .. } => assert_eq!(*kind, ErrorKind::Timeout),
        other => panic!("expected the banner to win, got {other:?}"),
    }
    assert_eq!(
        DecisionEngine::automatic_action(&outcome),
        ControlAction::RetryKeepSession
    );
}

#[tokio::test(start_paused = true)]
async fn classify_is_reproducible_for_static_content() {
    let rules = RuleSet::default();
    let classifier = Classifier::new(rules.classifier).unwrap();
    let engine = Arc::new(MockEngine::new(MockState::default()).with_eval(quiet_eval));
    let session = horawatch::Session::new(engine, std::env::temp_dir());

    let url = "https://tramites.example.cl/paso-2.aspx";
    let html = "<html><body>agendas llenas</body></html>";
    let first = classifier.classify(url, html, &session).await;
    let second = classifier.classify(url, html, &session).await;

    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.message, second.message);
    assert_eq!(
        first.verdict,
        Verdict::Unavailable { reason: ContentReason::ContentKeyword }
    );
}
