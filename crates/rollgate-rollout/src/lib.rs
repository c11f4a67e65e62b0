//! rollgate-rollout: sequenced rolling updates with health gates.
//!
//! Given a [`TargetRegistry`](rollgate_core::TargetRegistry), a
//! [`RunConfig`](rollgate_core::RunConfig) and the two capabilities
//! ([`Executor`] to change a target, [`Prober`](rollgate_health::Prober) to
//! check one), the [`RolloutEngine`] turns a [`Scope`] into a [`Plan`] and
//! drives it to a terminal state.
//!
//! # Architecture
//!
//! ```text
//! RolloutEngine
//!   ├── Plan (pre-validate set + ordered steps)
//!   ├── PreValidating   ── concurrent probes, one slot per target
//!   ├── UpdatingTargets ── deploy → health gate, one target at a time
//!   ├── PostValidating  ── route check through the front door
//!   ├── RollbackController (single bounded recovery pass)
//!   └── RunReporter (JSON-lines events + RunSummary)
//! ```
//!
//! Every run ends `Succeeded`, `RolledBack` or `Failed`. Advisory checks
//! record `Warn` and never stop the run. Cancellation is observed at phase
//! boundaries only; the run-wide ceiling interrupts the in-flight phase.

pub mod engine;
pub mod executor;
pub mod plan;
pub mod report;
pub mod rollback;
pub mod run;

pub use engine::RolloutEngine;
pub use executor::{ExecuteError, Executor};
pub use plan::{Plan, PlannedCheck, Scope, Step, StepKind};
pub use report::{RunEvent, RunReport, RunReporter, RunSummary, TargetHealth, TargetRow};
pub use rollback::{Recovery, RecoveryAttempt, RecoveryReport, RollbackContext, RollbackController};
pub use run::{
    DeploymentRun, EngineState, FailureKind, Outcome, OutcomeStatus, Phase, PhaseKind,
    PhaseRecord, RunFailure, RunStatus,
};
