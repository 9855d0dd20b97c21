//! Per-delivery run state machine.
//!
//! ```text
//! Received ─► Verified ─► Decoded ─► Deduplicated ─► Fetching ─► Analyzing ─► Publishing ─► Done
//!    │           │           │            │              │            │            │
//!    └───────────┴───────────┴─► Rejected │              └────────────┴────────────┴─► Failed
//!                            │            │
//!                            └─► Done     └─► Done  (duplicate, or already completed)
//! ```
//!
//! `Decoded → Done` covers events that are valid but not reviewable (a closed
//! pull request, a branch deletion, an unsupported event type).
//! `Analyzing → Done` covers a run whose result was superseded by a newer one.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::types::DeliveryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Received,
    Verified,
    Decoded,
    Deduplicated { duplicate: bool },
    Fetching,
    Analyzing,
    Publishing,
    Done,
    Rejected,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Rejected | RunState::Failed)
    }

    /// Whether `self → next` is a legal step.
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Received, Verified | Rejected) => true,
            (Verified, Decoded | Rejected) => true,
            (Decoded, Deduplicated { .. } | Rejected | Done) => true,
            (Deduplicated { duplicate: true }, Done) => true,
            (Deduplicated { duplicate: false }, Fetching | Done) => true,
            (Fetching, Analyzing | Failed) => true,
            (Analyzing, Publishing | Done | Failed) => true,
            (Publishing, Done | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Received => f.write_str("received"),
            RunState::Verified => f.write_str("verified"),
            RunState::Decoded => f.write_str("decoded"),
            RunState::Deduplicated { duplicate: true } => f.write_str("deduplicated(duplicate)"),
            RunState::Deduplicated { duplicate: false } => f.write_str("deduplicated(new)"),
            RunState::Fetching => f.write_str("fetching"),
            RunState::Analyzing => f.write_str("analyzing"),
            RunState::Publishing => f.write_str("publishing"),
            RunState::Done => f.write_str("done"),
            RunState::Rejected => f.write_str("rejected"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid run transition from {from} to {to}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}

/// Tracks one attempt at one delivery through the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTracker {
    delivery_id: DeliveryId,
    attempt: u32,
    history: Vec<RunState>,
    reason: Option<String>,
}

impl RunTracker {
    pub fn new(delivery_id: DeliveryId) -> Self {
        RunTracker {
            delivery_id,
            attempt: 1,
            history: vec![RunState::Received],
            reason: None,
        }
    }

    pub fn delivery_id(&self) -> &DeliveryId {
        &self.delivery_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> RunState {
        // history is never empty
        self.history.last().copied().unwrap_or(RunState::Received)
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Why the run was rejected or failed.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn reached(&self, state: RunState) -> bool {
        self.history.contains(&state)
    }

    /// The last non-terminal state, i.e. where a failed run stopped.
    pub fn last_stage(&self) -> RunState {
        self.history
            .iter()
            .rev()
            .find(|s| !s.is_terminal())
            .copied()
            .unwrap_or(RunState::Received)
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), TransitionError> {
        let from = self.state();
        if !from.can_advance_to(next) {
            return Err(TransitionError { from, to: next });
        }
        self.history.push(next);
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.advance(RunState::Rejected)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.advance(RunState::Failed)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    /// A fresh lineage for the next attempt, starting where deduplication
    /// left off.
    pub fn retry(&self) -> RunTracker {
        RunTracker {
            delivery_id: self.delivery_id.clone(),
            attempt: self.attempt + 1,
            history: vec![RunState::Deduplicated { duplicate: false }],
            reason: None,
        }
    }
}
