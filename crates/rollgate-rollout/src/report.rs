//! Run reporter: event log and final summary.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use rollgate_core::{Role, TargetRegistry};

use crate::plan::Scope;
use crate::run::{
    DeploymentRun, EngineState, OutcomeStatus, PhaseKind, PhaseRecord, RunFailure, RunStatus,
};

/// One entry in the append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StateChanged {
        at: DateTime<Utc>,
        run_id: Uuid,
        from: EngineState,
        to: EngineState,
    },
    PhaseCompleted {
        at: DateTime<Utc>,
        run_id: Uuid,
        record: PhaseRecord,
    },
}

/// Accumulates events as the run produces them.
///
/// Optionally mirrors every event as a JSON line into a sink (report file,
/// stdout). Sink errors are logged and otherwise ignored.
#[derive(Default)]
pub struct RunReporter {
    events: Vec<RunEvent>,
    sink: Option<Box<dyn Write + Send>>,
}

impl RunReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub(crate) fn state_changed(&mut self, run_id: Uuid, from: EngineState, to: EngineState) {
        self.push(RunEvent::StateChanged {
            at: Utc::now(),
            run_id,
            from,
            to,
        });
    }

    pub(crate) fn phase_completed(&mut self, run_id: Uuid, record: &PhaseRecord) {
        self.push(RunEvent::PhaseCompleted {
            at: Utc::now(),
            run_id,
            record: record.clone(),
        });
    }

    fn push(&mut self, event: RunEvent) {
        if let Some(sink) = self.sink.as_mut() {
            let written = serde_json::to_writer(&mut *sink, &event)
                .map_err(std::io::Error::from)
                .and_then(|_| sink.write_all(b"\n"))
                .and_then(|_| sink.flush());
            if let Err(e) = written {
                warn!(error = %e, "failed to write run event");
            }
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<RunEvent> {
        self.events
    }

    /// Build the immutable summary for a finished run.
    pub fn summarize(run: &DeploymentRun, registry: &TargetRegistry) -> RunSummary {
        let count = |status: OutcomeStatus| {
            run.phases()
                .iter()
                .filter(|r| r.outcome.status == status)
                .count()
        };

        let mut health: HashMap<&str, TargetHealth> = HashMap::new();
        for record in run.phases() {
            let verdict = match (record.phase.kind, record.outcome.status) {
                (_, OutcomeStatus::Skipped) => continue,
                (PhaseKind::Deploy, OutcomeStatus::Fail) => TargetHealth::Unhealthy,
                (PhaseKind::Deploy, _) => continue,
                (_, OutcomeStatus::Pass) => TargetHealth::Healthy,
                (_, OutcomeStatus::Fail | OutcomeStatus::Warn) => TargetHealth::Unhealthy,
            };
            health.insert(record.phase.target.as_str(), verdict);
        }

        let targets = registry
            .targets()
            .iter()
            .map(|t| TargetRow {
                name: t.name.clone(),
                role: t.role.clone(),
                address: t.address.clone(),
                health: health
                    .get(t.name.as_str())
                    .copied()
                    .unwrap_or(TargetHealth::Unknown),
            })
            .collect();

        RunSummary {
            run_id: run.id(),
            scope: run.scope(),
            status: run.status(),
            failures: run.failures().to_vec(),
            total_phases: run.phases().len(),
            passed: count(OutcomeStatus::Pass),
            failed: count(OutcomeStatus::Fail),
            warned: count(OutcomeStatus::Warn),
            skipped: count(OutcomeStatus::Skipped),
            targets,
            started_at: run.started_at(),
            finished_at: run.finished_at(),
            duration_ms: u64::try_from(run.duration().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Last known health of a target at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetHealth {
    Healthy,
    Unhealthy,
    /// Not probed during this run.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRow {
    pub name: String,
    pub role: Role,
    pub address: String,
    pub health: TargetHealth,
}

/// Final, immutable summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub scope: Scope,
    pub status: RunStatus,
    pub failures: Vec<RunFailure>,
    pub total_phases: usize,
    pub passed: usize,
    pub failed: usize,
    pub warned: usize,
    pub skipped: usize,
    pub targets: Vec<TargetRow>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl RunSummary {
    /// 0 only for `Succeeded`; a rolled-back run is still a failed check.
    pub fn exit_code(&self) -> i32 {
        if self.status == RunStatus::Succeeded {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rollgate {}: run {}", self.scope, self.run_id)?;
        writeln!(f, "status:   {}", self.status)?;
        writeln!(
            f,
            "phases:   {} total, {} passed, {} failed, {} warned, {} skipped",
            self.total_phases, self.passed, self.failed, self.warned, self.skipped
        )?;
        writeln!(f, "duration: {}ms", self.duration_ms)?;

        if !self.targets.is_empty() {
            writeln!(f)?;
            writeln!(f, "{:<24} {:<14} {:<20} HEALTH", "TARGET", "ROLE", "ADDRESS")?;
            for row in &self.targets {
                let health = match row.health {
                    TargetHealth::Healthy => "healthy",
                    TargetHealth::Unhealthy => "unhealthy",
                    TargetHealth::Unknown => "unknown",
                };
                writeln!(
                    f,
                    "{:<24} {:<14} {:<20} {health}",
                    row.name,
                    row.role.as_str(),
                    row.address
                )?;
            }
        }

        if !self.failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "failures:")?;
            for failure in &self.failures {
                writeln!(f, "  - {failure}")?;
            }
        }
        Ok(())
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: DeploymentRun,
    pub summary: RunSummary,
    pub events: Vec<RunEvent>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use rollgate_core::Target;

    use crate::run::{FailureKind, Outcome};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn registry() -> TargetRegistry {
        TargetRegistry::load(&vec![
            Target::new("lb", "A", Role::LoadBalancer),
            Target::new("b1", "B1", Role::Backend),
            Target::new("b2", "B2", Role::Backend),
        ])
        .unwrap()
    }

    #[test]
    fn summary_counts_and_final_health() {
        let mut run = DeploymentRun::new(Scope::Full);
        run.start();
        run.transition(EngineState::PreValidating);
        run.record(PhaseKind::PreValidate, "lb", false, Outcome::pass(1, Duration::ZERO));
        run.record(
            PhaseKind::PreValidate,
            "b2",
            false,
            Outcome::fail(FailureKind::Connectivity, 1, "refused", Duration::ZERO).advisory(),
        );
        run.transition(EngineState::UpdatingTargets);
        run.record(PhaseKind::Deploy, "b1", true, Outcome::pass(1, Duration::ZERO));
        run.record(PhaseKind::HealthGate, "b1", true, Outcome::pass(2, Duration::ZERO));
        run.record(
            PhaseKind::Deploy,
            "b2",
            true,
            Outcome::fail(FailureKind::Deployment, 1, "exit 3", Duration::ZERO),
        );
        run.record(PhaseKind::HealthGate, "b2", true, Outcome::skipped());
        run.transition(EngineState::RollingBack);
        run.transition(EngineState::Failed);

        let summary = RunReporter::summarize(&run, &registry());
        assert_eq!(summary.total_phases, 6);
        assert_eq!(
            (summary.passed, summary.failed, summary.warned, summary.skipped),
            (3, 1, 1, 1)
        );
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.exit_code(), 1);

        let health: Vec<_> = summary.targets.iter().map(|r| (r.name.as_str(), r.health)).collect();
        assert_eq!(
            health,
            [
                ("lb", TargetHealth::Healthy),
                ("b1", TargetHealth::Healthy),
                ("b2", TargetHealth::Unhealthy),
            ]
        );
    }

    #[test]
    fn untouched_targets_are_unknown() {
        let mut run = DeploymentRun::new(Scope::Backends);
        run.start();
        run.transition(EngineState::PreValidating);
        run.transition(EngineState::UpdatingTargets);
        run.transition(EngineState::Succeeded);

        let summary = RunReporter::summarize(&run, &registry());
        assert!(summary.targets.iter().all(|r| r.health == TargetHealth::Unknown));
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn sink_receives_json_lines() {
        let buf = SharedBuf::default();
        let mut reporter = RunReporter::new().with_sink(Box::new(buf.clone()));
        let run_id = Uuid::new_v4();

        reporter.state_changed(run_id, EngineState::Idle, EngineState::PreValidating);
        let mut run = DeploymentRun::new(Scope::Full);
        run.start();
        let record = run
            .record(PhaseKind::PreValidate, "lb", false, Outcome::pass(1, Duration::ZERO))
            .unwrap()
            .clone();
        reporter.phase_completed(run_id, &record);

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "state_changed");
        assert_eq!(lines[0]["to"], "pre_validating");
        assert_eq!(lines[1]["event"], "phase_completed");
        assert_eq!(lines[1]["record"]["phase"]["target"], "lb");
        assert_eq!(reporter.events().len(), 2);
    }

    #[test]
    fn text_rendering_lists_targets_and_failures() {
        let mut run = DeploymentRun::new(Scope::Full);
        run.start();
        run.add_failure(RunFailure {
            kind: FailureKind::Cancelled,
            phase: Some(PhaseKind::Deploy),
            target: Some("b1".into()),
            reason: "cancelled by operator".into(),
        });
        run.transition(EngineState::Failed);

        let text = RunReporter::summarize(&run, &registry()).to_string();
        assert!(text.contains("status:   failed"));
        assert!(text.contains("b2"));
        assert!(text.contains("Cancelled during deploy of b1: cancelled by operator"));
    }
}
