//! Pipeline state machine.
//!
//! ```text
//!            enqueue/remove/params
//!               ┌──────┐
//!               ▼      │
//!  reset ──▶  idle ────┘
//!    ▲         │ start_run (non-empty, library ready)
//!    │         ▼
//!    │    processing ──packaging failed / cancelled──▶ error(reason)
//!    │         │ all items complete                          │
//!    │         ▼                                             │
//!    └───────  done  ◀───────────────── reset ───────────────┘
//! ```
//!
//! Only the legality of transitions lives here. The guards that need
//! context (queue non-empty, readiness gate) are checked by
//! [`crate::session::BatchPipeline`] before it asks for `StartRun`.

use crate::error::BulkError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally observable pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Idle,
    Processing,
    Done,
    Error(String),
}

/// Events that move the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    StartRun,
    AllItemsComplete,
    PackagingFailed(String),
    Cancelled,
    Reset,
    /// Queue or parameter mutation.
    Mutate,
}

impl Transition {
    fn action(&self) -> &'static str {
        match self {
            Transition::StartRun => "start a run",
            Transition::AllItemsComplete => "complete a run",
            Transition::PackagingFailed(_) => "fail packaging",
            Transition::Cancelled => "cancel a run",
            Transition::Reset => "reset",
            Transition::Mutate => "modify the batch",
        }
    }
}

impl PipelineState {
    /// Compute the next state, or refuse the transition.
    pub fn apply(&self, t: &Transition) -> Result<PipelineState, BulkError> {
        use PipelineState::*;
        match (self, t) {
            (Idle, Transition::StartRun) => Ok(Processing),
            (Processing, Transition::StartRun) => Err(BulkError::AlreadyProcessing),
            (Processing, Transition::AllItemsComplete) => Ok(Done),
            (Processing, Transition::PackagingFailed(reason)) => Ok(Error(reason.clone())),
            (Processing, Transition::Cancelled) => Ok(Error("run cancelled".to_string())),
            (Idle | Done | Error(_), Transition::Reset) => Ok(Idle),
            (Idle, Transition::Mutate) => Ok(Idle),
            (state, t) => Err(BulkError::InvalidState {
                state: state.to_string(),
                action: t.action(),
            }),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PipelineState::Idle)
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, PipelineState::Processing)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, PipelineState::Done)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Processing => f.write_str("processing"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Error(reason) => write!(f, "error({reason})"),
        }
    }
}
