use serde::{Deserialize, Serialize};

use super::RunId;

/// Orchestrator state machine.
///
/// `Initialized → Refining → Planning → Retrieving → Synthesizing → Done`,
/// with `Error` reachable only from an unrecoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Run accepted, cache not yet consulted.
    Initialized,
    /// Rewriting the request.
    Refining,
    /// Deriving store-specific queries.
    Planning,
    /// Searching both stores.
    Retrieving,
    /// Writing the analysis.
    Synthesizing,
    /// Result produced.
    Done,
    /// Run failed or was cancelled.
    Error,
}

impl PipelineState {
    /// Get the state name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Initialized => "initialized",
            PipelineState::Refining => "refining",
            PipelineState::Planning => "planning",
            PipelineState::Retrieving => "retrieving",
            PipelineState::Synthesizing => "synthesizing",
            PipelineState::Done => "done",
            PipelineState::Error => "error",
        }
    }

    /// Progress percentage reported on entering this state.
    pub fn percent(&self) -> u8 {
        match self {
            PipelineState::Initialized => 0,
            PipelineState::Refining => 10,
            PipelineState::Planning => 30,
            PipelineState::Retrieving => 50,
            PipelineState::Synthesizing => 80,
            PipelineState::Done => 100,
            PipelineState::Error => 100,
        }
    }

    /// Whether the run has finished in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Error)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Emitted at every state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Run that emitted the event.
    pub run_id: RunId,
    /// State just entered.
    pub state: PipelineState,
    /// Coarse completion, `0..=100`.
    pub percent: u8,
    /// Human-readable status line.
    pub message: String,
}

impl ProgressEvent {
    pub(crate) fn new(run_id: RunId, state: PipelineState, message: impl Into<String>) -> Self {
        Self {
            run_id,
            state,
            percent: state.percent(),
            message: message.into(),
        }
    }
}

/// Receives progress events from a run.
///
/// Called synchronously from the run. A panic here fails the run with
/// [`PipelineError::Stage`](crate::error::PipelineError::Stage) for the state
/// being entered.
pub trait ProgressObserver: Send + Sync {
    /// Handle one event.
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
