//! The deployment run record and its state machine.
//!
//! ```text
//! Idle → PreValidating → UpdatingTargets → PostValidating → Succeeded
//!             │                │                 │
//!             └────────────────┴────────┬────────┘
//!                                       ▼
//!                                  RollingBack → RolledBack | Failed
//! ```
//!
//! Any non-terminal state may also go straight to `Failed` (cancellation,
//! run timeout). A [`DeploymentRun`] is only written by the engine and
//! never changes once it reaches a terminal state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::plan::Scope;

/// Kind of step a phase performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Early-warning probe before anything changes.
    PreValidate,
    /// Update action issued to a target.
    Deploy,
    /// Health probe right after a target's update.
    HealthGate,
    /// Cross-fleet routing check through the front door.
    PostValidate,
    /// Recovery action plus re-probe of one affected target.
    Rollback,
}

impl PhaseKind {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseKind::PreValidate => "pre-validate",
            PhaseKind::Deploy => "deploy",
            PhaseKind::HealthGate => "health",
            PhaseKind::PostValidate => "post-validate",
            PhaseKind::Rollback => "rollback",
        }
    }

    /// Whether this phase probes (rather than changes) its target.
    pub fn is_probe(&self) -> bool {
        !matches!(self, PhaseKind::Deploy)
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based position in the run.
    pub position: u32,
    pub kind: PhaseKind,
    pub target: String,
    /// Gating phases fail the run; advisory ones record `Warn`.
    pub gating: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pass,
    Fail,
    /// An advisory check failed; recorded, not terminal.
    Warn,
    Skipped,
}

/// Failure taxonomy carried by `Fail` and `Warn` outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connectivity,
    HealthCheckTimeout,
    Deployment,
    RollbackFailure,
    Cancelled,
    RunTimeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Connectivity => "ConnectivityError",
            FailureKind::HealthCheckTimeout => "HealthCheckTimeout",
            FailureKind::Deployment => "DeploymentError",
            FailureKind::RollbackFailure => "RollbackFailure",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::RunTimeout => "RunTimeout",
        })
    }
}

/// Result of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    /// Attempts used; 0 for skipped phases.
    pub attempts: u32,
    pub failure: Option<FailureKind>,
    pub last_error: Option<String>,
    pub duration_ms: u64,
}

impl Outcome {
    pub fn pass(attempts: u32, duration: Duration) -> Self {
        Self {
            status: OutcomeStatus::Pass,
            attempts,
            failure: None,
            last_error: None,
            duration_ms: millis(duration),
        }
    }

    pub fn fail(
        kind: FailureKind,
        attempts: u32,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            status: OutcomeStatus::Fail,
            attempts,
            failure: Some(kind),
            last_error: Some(error.into()),
            duration_ms: millis(duration),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            attempts: 0,
            failure: None,
            last_error: None,
            duration_ms: 0,
        }
    }

    /// Downgrade a `Fail` to `Warn` for advisory phases.
    pub fn advisory(mut self) -> Self {
        if self.status == OutcomeStatus::Fail {
            self.status = OutcomeStatus::Warn;
        }
        self
    }

    pub fn is_pass(&self) -> bool {
        self.status == OutcomeStatus::Pass
    }

    pub fn is_fail(&self) -> bool {
        self.status == OutcomeStatus::Fail
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A phase with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub outcome: Outcome,
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Recovered after a failure; the fleet is healthy but the update did not land.
    RolledBack,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::RolledBack
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::RolledBack => "rolled back",
        })
    }
}

/// Engine state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    PreValidating,
    UpdatingTargets,
    PostValidating,
    RollingBack,
    Succeeded,
    RolledBack,
    Failed,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Succeeded | EngineState::RolledBack | EngineState::Failed
        )
    }

    pub fn can_transition_to(&self, next: EngineState) -> bool {
        use EngineState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) => true,
            (Idle, PreValidating) => true,
            (PreValidating, UpdatingTargets | PostValidating | RollingBack) => true,
            (UpdatingTargets, PostValidating | Succeeded | RollingBack) => true,
            (PostValidating, Succeeded | RollingBack) => true,
            (RollingBack, RolledBack) => true,
            _ => false,
        }
    }

    fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            EngineState::Succeeded => Some(RunStatus::Succeeded),
            EngineState::RolledBack => Some(RunStatus::RolledBack),
            EngineState::Failed => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// A run-level failure with its context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub phase: Option<PhaseKind>,
    pub target: Option<String>,
    pub reason: String,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        match (&self.phase, &self.target) {
            (Some(phase), Some(target)) => write!(f, " during {phase} of {target}")?,
            (Some(phase), None) => write!(f, " during {phase}")?,
            (None, Some(target)) => write!(f, " on {target}")?,
            (None, None) => {}
        }
        write!(f, ": {}", self.reason)
    }
}

/// Everything that happened in one deployment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    id: Uuid,
    scope: Scope,
    status: RunStatus,
    state: EngineState,
    transitions: Vec<EngineState>,
    phases: Vec<PhaseRecord>,
    failures: Vec<RunFailure>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl DeploymentRun {
    pub(crate) fn new(scope: Scope) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            status: RunStatus::Pending,
            state: EngineState::Idle,
            transitions: vec![EngineState::Idle],
            phases: Vec::new(),
            failures: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Move to `next`. Invalid transitions are refused and logged.
    pub(crate) fn transition(&mut self, next: EngineState) -> bool {
        if !self.state.can_transition_to(next) {
            error!(run = %self.id, from = ?self.state, to = ?next, "invalid run state transition");
            return false;
        }
        info!(run = %self.id, from = ?self.state, to = ?next, "run state changed");
        self.state = next;
        self.transitions.push(next);
        if let Some(status) = next.terminal_status() {
            self.status = status;
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Append a phase outcome and return the stored record.
    pub(crate) fn record(
        &mut self,
        kind: PhaseKind,
        target: &str,
        gating: bool,
        outcome: Outcome,
    ) -> Option<&PhaseRecord> {
        if self.status.is_terminal() {
            warn!(run = %self.id, ?kind, %target, "ignoring outcome for a finished run");
            return None;
        }
        let position = u32::try_from(self.phases.len() + 1).unwrap_or(u32::MAX);
        self.phases.push(PhaseRecord {
            phase: Phase {
                position,
                kind,
                target: target.to_string(),
                gating,
            },
            outcome,
        });
        self.phases.last()
    }

    pub(crate) fn add_failure(&mut self, failure: RunFailure) {
        if !self.status.is_terminal() {
            self.failures.push(failure);
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Every state entered, starting with `Idle`.
    pub fn transitions(&self) -> &[EngineState] {
        &self.transitions
    }

    pub fn phases(&self) -> &[PhaseRecord] {
        &self.phases
    }

    /// Triggering failure first, then any recovery failures.
    pub fn failures(&self) -> &[RunFailure] {
        &self.failures
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn duration(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}
