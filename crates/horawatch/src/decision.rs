//! Turning an [`Outcome`] into the monitoring driver's next move.
//!
//! Two policies share one action vocabulary. The continuous policy is fully
//! automatic and total: every outcome maps to exactly one action. The
//! single-check policy hands the choice to the operator verbatim and infers
//! nothing on its own.

use serde::Serialize;
use tracing::info;

use crate::classify::{ErrorKind, Outcome, Verdict};
use crate::interstitial::InterstitialGuard;
use crate::Session;

/// How a run makes decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One check, with a human deciding what each outcome means.
    SingleCheck,
    /// Unattended polling; outcomes are handled automatically.
    Continuous,
}

/// What the monitoring driver does after an outcome is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlAction {
    /// Tear the browser session down and start over.
    RetryFromScratch,
    /// Retry immediately, keeping the browser alive.
    RetryKeepSession,
    /// Log the result and wait for the next poll interval.
    ContinueMonitoring,
    /// Hand the live browser to the operator.
    PauseForManualIntervention,
    Stop,
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlAction::RetryFromScratch => "retry from scratch",
            ControlAction::RetryKeepSession => "retry keeping the session",
            ControlAction::ContinueMonitoring => "continue monitoring",
            ControlAction::PauseForManualIntervention => "pause for manual intervention",
            ControlAction::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Operator's choice when shown an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    ContinueIgnoring,
    RetryFromScratch,
    ManualIntervention,
    Stop,
}

/// Operator's choice after a manual-intervention pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualChoice {
    ContinueFromCurrent,
    Restart,
    KeepPausing,
    Stop,
}

/// Interactive surface used only by the single-check policy. The CLI
/// implements it on stdin; tests script it.
pub trait OperatorPrompt: Send + Sync {
    fn outcome_menu(&self, outcome: &Outcome) -> MenuChoice;
    fn manual_menu(&self) -> ManualChoice;
}

pub struct DecisionEngine {
    mode: RunMode,
}

impl DecisionEngine {
    pub fn new(mode: RunMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// The continuous policy's total mapping.
    pub fn automatic_action(outcome: &Outcome) -> ControlAction {
        match &outcome.verdict {
            Verdict::Error { kind, .. } => match kind {
                ErrorKind::Timeout | ErrorKind::StatusPage => ControlAction::RetryKeepSession,
                ErrorKind::NoAvailability => ControlAction::ContinueMonitoring,
                // Unknown errors default to transient; revisit if this ever
                // spins on a truly fatal page state.
                ErrorKind::Unknown => ControlAction::RetryKeepSession,
            },
            Verdict::Unavailable { .. } => ControlAction::ContinueMonitoring,
            Verdict::Available { .. } => ControlAction::ContinueMonitoring,
            Verdict::Uncertain => ControlAction::RetryKeepSession,
        }
    }

    /// Choose the next action for `outcome` under this engine's mode.
    pub async fn decide(
        &self,
        outcome: &Outcome,
        session: Option<&Session>,
        guard: &InterstitialGuard,
        prompt: &dyn OperatorPrompt,
    ) -> ControlAction {
        match self.mode {
            RunMode::Continuous => {
                if outcome.is_transient_error() {
                    // A stale popup is the usual culprit behind transient
                    // errors; clearing it lets the retry start clean.
                    if let Some(session) = session {
                        if guard.detect_and_dismiss(session).await {
                            info!("overlay cleared while handling a transient error");
                        }
                    }
                }
                let action = Self::automatic_action(outcome);
                info!("decision: {action} ({})", outcome.message);
                action
            }
            RunMode::SingleCheck => match prompt.outcome_menu(outcome) {
                MenuChoice::ContinueIgnoring => ControlAction::ContinueMonitoring,
                MenuChoice::RetryFromScratch => ControlAction::RetryFromScratch,
                MenuChoice::ManualIntervention => ControlAction::PauseForManualIntervention,
                MenuChoice::Stop => ControlAction::Stop,
            },
        }
    }

    /// Resolve a manual-intervention pause into a follow-up action. Loops as
    /// long as the operator keeps pausing.
    pub fn manual_intervention(&self, prompt: &dyn OperatorPrompt) -> ControlAction {
        loop {
            match prompt.manual_menu() {
                ManualChoice::ContinueFromCurrent => return ControlAction::RetryKeepSession,
                ManualChoice::Restart => return ControlAction::RetryFromScratch,
                ManualChoice::KeepPausing => continue,
                ManualChoice::Stop => return ControlAction::Stop,
            }
        }
    }
}
