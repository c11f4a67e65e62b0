//! Rollout engine: drives a run through the phase state machine.
//!
//! The engine is the only writer of the [`DeploymentRun`]. Probe and
//! executor failures come back as outcomes; the engine alone decides when a
//! run stops. Backends are updated strictly one at a time: a target is not
//! touched until its predecessor has been deployed and passed its health gate.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rollgate_core::{ConfigResult, RunConfig, Target, TargetRegistry, format_duration};
use rollgate_health::{CheckKind, HealthProbe, ProbeVerdict, Prober, Sleeper, TokioSleeper};

use crate::executor::{ExecuteError, Executor};
use crate::plan::{Plan, Scope, StepKind};
use crate::report::{RunReport, RunReporter};
use crate::rollback::{RollbackContext, RollbackController};
use crate::run::{DeploymentRun, EngineState, FailureKind, Outcome, PhaseKind, RunFailure};

/// Orchestrates one deployment run at a time over a fixed fleet.
pub struct RolloutEngine {
    registry: TargetRegistry,
    config: RunConfig,
    executor: Arc<dyn Executor>,
    probe: HealthProbe,
    sleeper: Arc<dyn Sleeper>,
    rollback: RollbackController,
}

/// The phase currently suspended on a probe or executor call.
struct InFlight {
    kind: PhaseKind,
    target: Target,
    gating: bool,
    /// Whether this is `plan.steps[next_step]` rather than a rollback.
    is_step: bool,
    started: Instant,
}

/// Mutable state of the run being driven.
struct RunState {
    run: DeploymentRun,
    reporter: RunReporter,
    /// Targets that received an update action, in order.
    touched: Vec<Target>,
    /// Index of the first plan step without a recorded outcome.
    next_step: usize,
    in_flight: Option<InFlight>,
    cancel: watch::Receiver<bool>,
}

impl RunState {
    fn transition(&mut self, to: EngineState) {
        let from = self.run.state();
        if from != to && self.run.transition(to) {
            self.reporter.state_changed(self.run.id(), from, to);
        }
    }

    fn begin(&mut self, kind: PhaseKind, target: &Target, gating: bool, is_step: bool) {
        self.in_flight = Some(InFlight {
            kind,
            target: target.clone(),
            gating,
            is_step,
            started: Instant::now(),
        });
    }

    fn record(&mut self, kind: PhaseKind, target: &str, gating: bool, outcome: Outcome) {
        self.in_flight = None;
        let run_id = self.run.id();
        if let Some(record) = self.run.record(kind, target, gating, outcome) {
            self.reporter.phase_completed(run_id, record);
        }
    }

    fn skip_pre_validate(&mut self, plan: &Plan) {
        for check in &plan.pre_validate {
            let name = &check.target.name;
            self.record(PhaseKind::PreValidate, name, check.gating, Outcome::skipped());
        }
    }

    fn skip_remaining(&mut self, plan: &Plan) {
        while let Some(step) = plan.steps.get(self.next_step) {
            self.record(step.kind.phase(), &step.target.name, step.gating, Outcome::skipped());
            self.next_step += 1;
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

impl RolloutEngine {
    /// Engine that sleeps on the tokio timer between retries.
    pub fn new(
        registry: TargetRegistry,
        config: RunConfig,
        executor: Arc<dyn Executor>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self::with_sleeper(registry, config, executor, prober, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        registry: TargetRegistry,
        config: RunConfig,
        executor: Arc<dyn Executor>,
        prober: Arc<dyn Prober>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let probe = HealthProbe::new(prober).with_sleeper(sleeper.clone());
        let rollback =
            RollbackController::new(executor.clone(), probe.clone(), sleeper.clone(), &config);
        Self {
            registry,
            config,
            executor,
            probe,
            sleeper,
            rollback,
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn plan(&self, scope: Scope) -> ConfigResult<Plan> {
        Plan::build(&self.registry, scope, &self.config)
    }

    /// Execute one run over `scope`.
    ///
    /// Only plan construction can fail; every runtime failure ends up in the
    /// returned report. `cancel` is checked at every phase boundary.
    pub async fn run(
        &self,
        scope: Scope,
        cancel: watch::Receiver<bool>,
    ) -> ConfigResult<RunReport> {
        self.run_with(scope, cancel, RunReporter::new()).await
    }

    /// Like [`run`](Self::run), streaming events through `reporter`.
    pub async fn run_with(
        &self,
        scope: Scope,
        cancel: watch::Receiver<bool>,
        reporter: RunReporter,
    ) -> ConfigResult<RunReport> {
        let plan = self.plan(scope)?;

        let mut st = RunState {
            run: DeploymentRun::new(scope),
            reporter,
            touched: Vec::new(),
            next_step: 0,
            in_flight: None,
            cancel,
        };
        st.run.start();
        info!(
            run = %st.run.id(),
            %scope,
            targets = self.registry.len(),
            steps = plan.steps.len(),
            "deployment run started"
        );

        let finished = tokio::time::timeout(self.config.run_timeout, self.drive(&plan, &mut st))
            .await
            .is_ok();
        if !finished {
            self.expire(&plan, &mut st).await;
        }

        let summary = RunReporter::summarize(&st.run, &self.registry);
        info!(
            run = %summary.run_id,
            status = %summary.status,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "deployment run finished"
        );

        Ok(RunReport {
            run: st.run,
            summary,
            events: st.reporter.into_events(),
        })
    }

    async fn drive(&self, plan: &Plan, st: &mut RunState) {
        st.transition(EngineState::PreValidating);
        if st.cancelled() {
            st.skip_pre_validate(plan);
            return self.stop_cancelled(plan, st);
        }

        if let Err((failure, target)) = self.pre_validate(plan, st).await {
            return self.roll_back(plan, st, failure, &target).await;
        }

        for (index, step) in plan.steps.iter().enumerate() {
            // A deployed target always gets its health gate before the run stops.
            if step.kind != StepKind::HealthGate && st.cancelled() {
                return self.stop_cancelled(plan, st);
            }

            st.transition(match step.kind {
                StepKind::PostValidate => EngineState::PostValidating,
                StepKind::Deploy | StepKind::HealthGate => EngineState::UpdatingTargets,
            });

            let phase = step.kind.phase();
            st.begin(phase, &step.target, step.gating, true);
            let outcome = match step.kind {
                StepKind::Deploy => {
                    st.touched.push(step.target.clone());
                    self.deploy(&step.target).await
                }
                StepKind::HealthGate => {
                    self.check(&step.target, CheckKind::Liveness, PhaseKind::HealthGate)
                        .await
                }
                StepKind::PostValidate => {
                    self.check(&step.target, CheckKind::Route, PhaseKind::PostValidate)
                        .await
                }
            };

            let failure = outcome.is_fail().then(|| failure_of(phase, &step.target, &outcome));
            let outcome = if step.gating { outcome } else { outcome.advisory() };
            st.record(phase, &step.target.name, step.gating, outcome);
            st.next_step = index + 1;

            match failure {
                Some(failure) if step.gating => {
                    return self.roll_back(plan, st, failure, &step.target).await;
                }
                Some(failure) => {
                    warn!(run = %st.run.id(), %failure, "advisory check failed");
                }
                None => {}
            }
        }

        st.transition(EngineState::Succeeded);
    }

    /// Probe every planned target concurrently; each writes its own slot.
    async fn pre_validate(
        &self,
        plan: &Plan,
        st: &mut RunState,
    ) -> Result<(), (RunFailure, Target)> {
        let policy = &self.config.pre_validate_policy;
        let probes = plan.pre_validate.iter().map(|check| async move {
            let started = Instant::now();
            let verdict = self.probe.probe(&check.target, policy).await;
            outcome_of(verdict, started.elapsed())
        });
        let outcomes = join_all(probes).await;

        let mut first_failure = None;
        for (check, outcome) in plan.pre_validate.iter().zip(outcomes) {
            if outcome.is_fail() {
                let failure = failure_of(PhaseKind::PreValidate, &check.target, &outcome);
                if !check.gating {
                    warn!(run = %st.run.id(), %failure, "pre-validation warning");
                } else if first_failure.is_none() {
                    first_failure = Some((failure, check.target.clone()));
                }
            }
            let outcome = if check.gating { outcome } else { outcome.advisory() };
            st.record(PhaseKind::PreValidate, &check.target.name, check.gating, outcome);
        }

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Issue the update action, retrying only while the target is unreachable.
    async fn deploy(&self, target: &Target) -> Outcome {
        let action = self.config.actions.update_action(&target.role);
        let policy = &self.config.update_policy;
        let timeout = self.config.execute_timeout;
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            info!(target = %target.name, action, attempt, "issuing update action");
            let result =
                tokio::time::timeout(timeout, self.executor.execute(target, action)).await;
            match result {
                Ok(Ok(())) => return Outcome::pass(attempt, started.elapsed()),
                Ok(Err(ExecuteError::Unreachable(reason))) if attempt < policy.max_attempts() => {
                    debug!(
                        target = %target.name,
                        action,
                        attempt,
                        %reason,
                        "target unreachable, retrying"
                    );
                    self.sleeper.sleep(policy.retry_delay()).await;
                    attempt += 1;
                }
                Ok(Err(ExecuteError::Unreachable(reason))) => {
                    return Outcome::fail(
                        FailureKind::Connectivity,
                        attempt,
                        format!("{action}: unreachable: {reason}"),
                        started.elapsed(),
                    );
                }
                Ok(Err(ExecuteError::Failed(reason))) => {
                    return Outcome::fail(
                        FailureKind::Deployment,
                        attempt,
                        format!("{action} failed: {reason}"),
                        started.elapsed(),
                    );
                }
                Err(_) => {
                    return Outcome::fail(
                        FailureKind::Deployment,
                        attempt,
                        format!("{action} timed out after {}", format_duration(timeout)),
                        started.elapsed(),
                    );
                }
            }
        }
    }

    async fn check(&self, target: &Target, kind: CheckKind, phase: PhaseKind) -> Outcome {
        let policy = match phase {
            PhaseKind::PostValidate => &self.config.post_validate_policy,
            _ => &self.config.update_policy,
        };
        let started = Instant::now();
        let verdict = self.probe.check(target, kind, policy).await;
        outcome_of(verdict, started.elapsed())
    }

    async fn roll_back(
        &self,
        plan: &Plan,
        st: &mut RunState,
        failure: RunFailure,
        failed: &Target,
    ) {
        warn!(run = %st.run.id(), %failure, "gating phase failed, rolling back");
        st.skip_remaining(plan);
        st.run.add_failure(failure);
        st.transition(EngineState::RollingBack);

        if self.recover(st, failed).await {
            st.transition(EngineState::RolledBack);
        } else {
            st.transition(EngineState::Failed);
        }
    }

    /// One recovery pass over every touched target plus `failed`.
    async fn recover(&self, st: &mut RunState, failed: &Target) -> bool {
        st.begin(PhaseKind::Rollback, failed, true, false);
        let report = self
            .rollback
            .attempt(failed, RollbackContext { touched: &st.touched })
            .await;
        for attempt in &report.attempts {
            st.record(
                PhaseKind::Rollback,
                &attempt.target.name,
                true,
                attempt.outcome.clone(),
            );
        }

        if let Some(bad) = report.first_failure() {
            st.run.add_failure(RunFailure {
                kind: FailureKind::RollbackFailure,
                phase: Some(PhaseKind::Rollback),
                target: Some(bad.target.name.clone()),
                reason: bad.outcome.last_error.clone().unwrap_or_default(),
            });
        }
        report.recovered()
    }

    fn stop_cancelled(&self, plan: &Plan, st: &mut RunState) {
        let next = plan.steps.get(st.next_step);
        let reason = match next {
            Some(step) => format!("cancelled before {} of {}", step.kind.phase(), step.target.name),
            None => "cancelled".to_string(),
        };
        info!(run = %st.run.id(), %reason, "cancellation observed at phase boundary");

        let failure = RunFailure {
            kind: FailureKind::Cancelled,
            phase: next.map(|s| s.kind.phase()),
            target: next.map(|s| s.target.name.clone()),
            reason,
        };
        st.skip_remaining(plan);
        st.run.add_failure(failure);
        st.transition(EngineState::Failed);
    }

    /// The run ceiling fired: close out the in-flight phase, recover, fail.
    ///
    /// Interrupted pre-validation checks are read-only and recorded as
    /// skipped. An interrupted step is a `Fail(RunTimeout)` followed by the
    /// usual recovery pass. The run ends `Failed` either way.
    async fn expire(&self, plan: &Plan, st: &mut RunState) {
        let reason = format!("run exceeded {}", format_duration(self.config.run_timeout));
        warn!(run = %st.run.id(), %reason, "run timed out");

        let in_pre_validation = st.run.state() == EngineState::PreValidating;
        let interrupted = st.in_flight.take();
        match &interrupted {
            Some(flight) => {
                let elapsed = flight.started.elapsed();
                let outcome = Outcome::fail(FailureKind::RunTimeout, 1, reason.clone(), elapsed);
                st.record(flight.kind, &flight.target.name, flight.gating, outcome);
                if flight.is_step {
                    st.next_step += 1;
                }
            }
            None if in_pre_validation => st.skip_pre_validate(plan),
            None => {}
        }

        st.skip_remaining(plan);
        st.run.add_failure(RunFailure {
            kind: FailureKind::RunTimeout,
            phase: interrupted
                .as_ref()
                .map(|f| f.kind)
                .or(in_pre_validation.then_some(PhaseKind::PreValidate)),
            target: interrupted.as_ref().map(|f| f.target.name.clone()),
            reason,
        });

        let failed = match interrupted {
            // The recovery pass itself was cut short.
            Some(flight) if flight.kind == PhaseKind::Rollback => None,
            Some(flight) => Some(flight.target),
            None => st.touched.last().cloned(),
        };
        if let Some(failed) = failed {
            st.transition(EngineState::RollingBack);
            self.recover(st, &failed).await;
        }
        st.transition(EngineState::Failed);
    }
}

fn outcome_of(verdict: ProbeVerdict, elapsed: std::time::Duration) -> Outcome {
    match verdict {
        ProbeVerdict::Healthy { attempts } => Outcome::pass(attempts, elapsed),
        ProbeVerdict::Unhealthy {
            attempts,
            last_error,
        } => {
            let kind = if last_error.is_connectivity() {
                FailureKind::Connectivity
            } else {
                FailureKind::HealthCheckTimeout
            };
            Outcome::fail(kind, attempts, last_error.to_string(), elapsed)
        }
    }
}

fn failure_of(phase: PhaseKind, target: &Target, outcome: &Outcome) -> RunFailure {
    RunFailure {
        kind: outcome.failure.unwrap_or(FailureKind::HealthCheckTimeout),
        phase: Some(phase),
        target: Some(target.name.clone()),
        reason: outcome.last_error.clone().unwrap_or_default(),
    }
}
