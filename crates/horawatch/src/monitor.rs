//! The monitoring driver: owns the one browser session, runs check cycles,
//! and obeys the decision engine.
//!
//! Nothing below this module is allowed to terminate the process. Faults
//! inside a cycle are converted into outcomes and fed back through the
//! decision policy; only a bootstrap failure (the browser cannot be started
//! at all) or an explicit stop ends the run.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{Classifier, ContentReason, ErrorKind, Outcome, Verdict};
use crate::config::WatchConfig;
use crate::decision::{ControlAction, DecisionEngine, OperatorPrompt, RunMode};
use crate::engine::EngineLauncher;
use crate::errors::WatchError;
use crate::flow::{self, StepTarget};
use crate::interstitial::InterstitialGuard;
use crate::rules::RuleSet;
use crate::rut::Rut;
use crate::Session;

/// Mutable bookkeeping for the run, owned exclusively by the driver.
#[derive(Debug, Default)]
pub struct SessionState {
    pub attempts: u32,
    pub last_outcome: Option<Outcome>,
    /// When set, the next cycle tears the browser down and starts fresh.
    pub recreate_session: bool,
}

/// What the run loop does after obeying a [`ControlAction`].
enum LoopFlow {
    Again,
    WaitThenAgain,
    Finish,
}

pub struct Monitor {
    config: WatchConfig,
    classifier: Classifier,
    guard: InterstitialGuard,
    decisions: DecisionEngine,
    launcher: Arc<dyn EngineLauncher>,
    prompt: Arc<dyn OperatorPrompt>,
    cancel: CancellationToken,
    step_target: StepTarget,
    rut: Rut,
    state: SessionState,
    session: Option<Session>,
}

impl Monitor {
    pub fn new(
        config: WatchConfig,
        rules: RuleSet,
        mode: RunMode,
        rut: Rut,
        launcher: Arc<dyn EngineLauncher>,
        prompt: Arc<dyn OperatorPrompt>,
        cancel: CancellationToken,
    ) -> Result<Self, WatchError> {
        url::Url::parse(&config.target_url).map_err(|e| {
            WatchError::InvalidConfig(format!("target URL {:?}: {e}", config.target_url))
        })?;
        Ok(Self {
            classifier: Classifier::new(rules.classifier)?,
            guard: InterstitialGuard::new(rules.overlay),
            decisions: DecisionEngine::new(mode),
            config,
            launcher,
            prompt,
            cancel,
            step_target: StepTarget::default(),
            rut,
            state: SessionState::default(),
            session: None,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run to completion under the configured mode, then tear the session
    /// down. Only fatal bootstrap failures surface as errors.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        let result = match self.decisions.mode() {
            RunMode::SingleCheck => self.run_loop(false).await,
            RunMode::Continuous => {
                info!(
                    "🔄 continuous monitoring started (every {} minute(s), Ctrl+C to stop)",
                    self.config.poll_interval_minutes
                );
                self.run_loop(true).await
            }
        };
        self.shutdown().await;
        result
    }

    async fn run_loop(&mut self, continuous: bool) -> Result<(), WatchError> {
        loop {
            if self.cancel.is_cancelled() {
                info!("🛑 stop requested, ending the watch");
                return Ok(());
            }

            let outcome = match self.check_once().await {
                Ok(outcome) => outcome,
                Err(WatchError::Cancelled) => {
                    info!("🛑 check interrupted, ending the watch");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let action = self
                .decisions
                .decide(&outcome, self.session.as_ref(), &self.guard, self.prompt.as_ref())
                .await;

            match self.obey(action, continuous).await {
                LoopFlow::Again => continue,
                LoopFlow::WaitThenAgain => {
                    if !self.wait_interval().await {
                        return Ok(());
                    }
                }
                LoopFlow::Finish => return Ok(()),
            }
        }
    }

    /// One complete availability check. Faults below the driver are caught
    /// here and become outcomes; only cancellation and fatal errors pass
    /// through.
    pub async fn check_once(&mut self) -> Result<Outcome, WatchError> {
        self.state.attempts += 1;
        info!(
            "🚀 starting check #{} for {} ({})",
            self.state.attempts,
            self.rut,
            match self.decisions.mode() {
                RunMode::Continuous => "continuous monitoring",
                RunMode::SingleCheck => "single check",
            }
        );

        let outcome = match self.cycle().await {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() || matches!(e, WatchError::Cancelled) => return Err(e),
            Err(e) => {
                warn!("check #{} failed mid-cycle, treating as transient: {e}", self.state.attempts);
                Outcome::error(ErrorKind::Unknown, "", format!("check failed: {e}"))
            }
        };

        self.narrate(&outcome);
        self.state.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }

    async fn cycle(&mut self) -> Result<Outcome, WatchError> {
        let session = self.ensure_session().await?;

        // From the second attempt on, the context is always rebuilt so no
        // cached client-side state bleeds between cycles.
        if self.state.attempts > 1 {
            if let Err(e) = session.reset_context().await {
                warn!("context recreation failed, continuing with the old one: {e}");
            }
        }

        session.clear_browsing_data().await;
        session.navigate(&self.config.target_url).await?;
        self.guard.detect_and_dismiss(&session).await;
        session.screenshot_phase("navigate").await;

        flow::fill_identifier_form(&session, &self.guard, &self.rut).await?;
        session.screenshot_phase("result").await;

        let url = session.current_url().await?;
        if self.on_step_page(&url) {
            debug!(%url, "landed on a booking step page");

            let outcome = flow::observe(&session, &self.classifier).await;
            match &outcome.verdict {
                Verdict::Error { .. } => return Ok(outcome),
                Verdict::Unavailable { reason: ContentReason::NoAvailabilityRedirect } => {
                    return Ok(outcome)
                }
                _ => {}
            }

            if url.contains(&self.classifier.rules().status_page_url_marker) {
                let report = flow::inspect_status_page(&session).await;
                if !report.errors.is_empty() {
                    let message = report.errors.join("; ");
                    return Ok(Outcome::new(
                        Verdict::Error {
                            kind: ErrorKind::StatusPage,
                            raw_messages: report.errors,
                        },
                        url,
                        format!("status page errors: {message}"),
                    ));
                }
            }

            return flow::advance_step(
                &session,
                &self.guard,
                &self.classifier,
                &self.step_target,
                &self.cancel,
            )
            .await;
        }

        Ok(flow::observe(&session, &self.classifier).await)
    }

    async fn obey(&mut self, action: ControlAction, continuous: bool) -> LoopFlow {
        let mut action = action;
        loop {
            return match action {
                ControlAction::RetryFromScratch => {
                    info!("♻️ retrying with a fresh browser session");
                    self.state.recreate_session = true;
                    LoopFlow::Again
                }
                ControlAction::RetryKeepSession => {
                    info!("♻️ retrying immediately, keeping the browser open");
                    if let Some(session) = &self.session {
                        session.clear_browsing_data().await;
                    }
                    LoopFlow::Again
                }
                ControlAction::ContinueMonitoring => {
                    if continuous {
                        LoopFlow::WaitThenAgain
                    } else {
                        LoopFlow::Finish
                    }
                }
                ControlAction::PauseForManualIntervention => {
                    info!("🖱️ browser handed to the operator for manual intervention");
                    action = self.decisions.manual_intervention(self.prompt.as_ref());
                    continue;
                }
                ControlAction::Stop => {
                    info!("🛑 stopping at the operator's request");
                    LoopFlow::Finish
                }
            };
        }
    }

    /// Cancellation-aware interval wait with a per-minute countdown.
    /// Returns false when the wait was interrupted.
    async fn wait_interval(&self) -> bool {
        let minutes = self.config.poll_interval_minutes;
        info!("⏰ waiting {minutes} minute(s) until the next check");

        for remaining in (1..=minutes).rev() {
            debug!("⏳ {remaining} minute(s) remaining");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("wait interrupted, ending the watch");
                    return false;
                }
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
            }
        }
        true
    }

    async fn ensure_session(&mut self) -> Result<Session, WatchError> {
        if self.state.recreate_session {
            if let Some(old) = self.session.take() {
                info!("tearing down the previous browser session");
                old.close().await;
            }
            self.state.recreate_session = false;
        }

        if let Some(session) = &self.session {
            debug!("reusing the existing browser session");
            return Ok(session.clone());
        }

        info!(
            "🌐 launching {} (headless: {})",
            self.config.browser, self.config.headless
        );
        let engine = self.launcher.launch(&self.config.engine_config()).await?;
        let session = Session::new(engine, self.config.screenshot_dir.clone());
        self.session = Some(session.clone());
        Ok(session)
    }

    fn on_step_page(&self, url: &str) -> bool {
        self.classifier
            .rules()
            .step_page_url_markers
            .iter()
            .any(|marker| url.contains(marker.as_str()))
    }

    fn narrate(&self, outcome: &Outcome) {
        match &outcome.verdict {
            Verdict::Available { .. } => {
                info!("🎉 SLOTS AVAILABLE! {} ({})", outcome.message, outcome.url);
            }
            Verdict::Unavailable { .. } => {
                info!("❌ no slots available: {}", outcome.message);
            }
            Verdict::Error { kind, raw_messages } => {
                warn!("🚨 page error ({kind:?}): {}", outcome.message);
                for (i, raw) in raw_messages.iter().enumerate() {
                    warn!("   error {}: {raw}", i + 1);
                }
            }
            Verdict::Uncertain => {
                warn!("⚠️ uncertain result, manual review suggested: {}", outcome.message);
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            info!("🧹 cleaning up browser session");
            session.close().await;
        }
    }
}
