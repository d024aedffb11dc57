//! Pipeline phase tracking.
//!
//! `PipelineState` is the one mutable record shared between the trigger
//! path and the running task. A run may only begin from `Idle`, which is
//! the whole single-flight mechanism.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::clipboard::ClipboardSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CapturingSelection,
    AwaitingTransform,
    ReplacingText,
    /// Restoring the clipboard after an error; always followed by `Idle`.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::CapturingSelection => "capturing",
            Phase::AwaitingTransform => "transforming",
            Phase::ReplacingText => "replacing",
            Phase::Failed => "failed",
        })
    }
}

/// One clipboard poll after the synthetic copy.
#[derive(Debug, Clone)]
pub struct CaptureAttempt {
    pub attempt_number: u32,
    /// Trimmed text, `None` when empty or not text.
    pub observed_content: Option<String>,
    /// Since the copy was sent.
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct PipelineState {
    phase: Phase,
    run_id: Option<Uuid>,
    started: Option<Instant>,
    snapshot: Option<ClipboardSnapshot>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            run_id: None,
            started: None,
            snapshot: None,
        }
    }
}

impl PipelineState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    /// Enter `CapturingSelection` if idle. Returns `false` (and changes
    /// nothing) otherwise.
    pub fn try_begin(&mut self, run_id: Uuid) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::CapturingSelection;
        self.run_id = Some(run_id);
        self.started = Some(Instant::now());
        true
    }

    pub fn advance(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
    }

    /// Store the pre-run snapshot. At most one is held.
    pub fn hold_snapshot(&mut self, snapshot: ClipboardSnapshot) {
        debug_assert!(self.snapshot.is_none(), "snapshot already held");
        self.snapshot = Some(snapshot);
    }

    pub fn take_snapshot(&mut self) -> Option<ClipboardSnapshot> {
        self.snapshot.take()
    }

    /// Back to `Idle`. Returns how long the run took.
    pub fn reset(&mut self) -> Duration {
        let took = self.started.map(|s| s.elapsed()).unwrap_or_default();
        *self = Self::default();
        took
    }
}
