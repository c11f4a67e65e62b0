//! Rollback controller: one bounded recovery pass after a failed step.
//!
//! The pass re-issues the recovery action to every target touched since the
//! run started (plus the failed target), waits a fixed settle time, then
//! probes each target once. It never loops: if recovery does not restore
//! health the run ends `Failed` and the operator has to re-run.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use rollgate_core::{HealthCheckPolicy, RunConfig, Target, format_duration};
use rollgate_health::{HealthProbe, ProbeVerdict, Sleeper};

use crate::executor::Executor;
use crate::run::{FailureKind, Outcome};

/// What the engine knows at the time of the failure.
#[derive(Debug, Clone, Copy)]
pub struct RollbackContext<'a> {
    /// Targets that received an update action this run, in order.
    pub touched: &'a [Target],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Recovered,
    Unrecovered,
}

/// Recovery outcome for one affected target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAttempt {
    pub target: Target,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovery: Recovery,
    /// One entry per affected target, in the order they were handled.
    pub attempts: Vec<RecoveryAttempt>,
}

impl RecoveryReport {
    pub fn recovered(&self) -> bool {
        self.recovery == Recovery::Recovered
    }

    /// First attempt that did not pass.
    pub fn first_failure(&self) -> Option<&RecoveryAttempt> {
        self.attempts.iter().find(|a| !a.outcome.is_pass())
    }
}

pub struct RollbackController {
    executor: Arc<dyn Executor>,
    probe: HealthProbe,
    sleeper: Arc<dyn Sleeper>,
    action: String,
    policy: HealthCheckPolicy,
    settle_time: Duration,
    execute_timeout: Duration,
}

impl RollbackController {
    pub fn new(
        executor: Arc<dyn Executor>,
        probe: HealthProbe,
        sleeper: Arc<dyn Sleeper>,
        config: &RunConfig,
    ) -> Self {
        Self {
            executor,
            probe,
            sleeper,
            action: config.actions.recover.clone(),
            policy: config.recovery_policy,
            settle_time: config.settle_time,
            execute_timeout: config.execute_timeout,
        }
    }

    /// Targets the pass will act on: everything touched, then `failed` if new.
    pub fn affected<'a>(failed: &'a Target, ctx: &RollbackContext<'a>) -> Vec<&'a Target> {
        let mut affected: Vec<&Target> = ctx.touched.iter().collect();
        if !affected.iter().any(|t| t.name == failed.name) {
            affected.push(failed);
        }
        affected
    }

    pub async fn attempt(&self, failed: &Target, ctx: RollbackContext<'_>) -> RecoveryReport {
        let affected = Self::affected(failed, &ctx);
        info!(
            failed = %failed.name,
            affected = affected.len(),
            action = %self.action,
            "starting recovery pass"
        );

        struct Slot<'t> {
            target: &'t Target,
            started: Instant,
            outcome: Option<Outcome>,
        }

        let mut slots = Vec::with_capacity(affected.len());
        for target in affected {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.execute_timeout,
                self.executor.execute(target, &self.action),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{} failed: {e}", self.action)),
                Err(_) => Some(format!(
                    "{} timed out after {}",
                    self.action,
                    format_duration(self.execute_timeout)
                )),
            }
            .map(|reason| {
                warn!(target = %target.name, %reason, "recovery action failed");
                Outcome::fail(FailureKind::RollbackFailure, 1, reason, started.elapsed())
            });
            slots.push(Slot {
                target,
                started,
                outcome,
            });
        }

        if slots.iter().any(|s| s.outcome.is_none()) {
            self.sleeper.sleep(self.settle_time).await;
        }

        for slot in slots.iter_mut().filter(|s| s.outcome.is_none()) {
            let verdict = self.probe.probe(slot.target, &self.policy).await;
            let elapsed = slot.started.elapsed();
            slot.outcome = Some(match verdict {
                ProbeVerdict::Healthy { attempts } => Outcome::pass(attempts, elapsed),
                ProbeVerdict::Unhealthy {
                    attempts,
                    last_error,
                } => {
                    warn!(
                        target = %slot.target.name,
                        error = %last_error,
                        "target still unhealthy after recovery"
                    );
                    Outcome::fail(
                        FailureKind::RollbackFailure,
                        attempts,
                        format!("still unhealthy after {}: {last_error}", self.action),
                        elapsed,
                    )
                }
            });
        }

        let attempts: Vec<RecoveryAttempt> = slots
            .into_iter()
            .map(|s| RecoveryAttempt {
                target: s.target.clone(),
                outcome: s.outcome.unwrap_or_else(Outcome::skipped),
            })
            .collect();

        let recovery = if attempts.iter().all(|a| a.outcome.is_pass()) {
            Recovery::Recovered
        } else {
            Recovery::Unrecovered
        };
        info!(?recovery, "recovery pass finished");

        RecoveryReport { recovery, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rollgate_core::Role;
    use rollgate_health::{CheckKind, ProbeError, Prober};

    use crate::executor::ExecuteError;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_on: Vec<String>,
    }

    #[async_trait]
    impl Executor for Recorder {
        async fn execute(&self, target: &Target, action: &str) -> Result<(), ExecuteError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{action}:{}", target.name));
            if self.fail_on.contains(&target.name) {
                Err(ExecuteError::Failed("exit 1".into()))
            } else {
                Ok(())
            }
        }
    }

    struct UnhealthySet(Vec<String>);

    #[async_trait]
    impl Prober for UnhealthySet {
        async fn check(&self, target: &Target, _kind: CheckKind) -> Result<(), ProbeError> {
            if self.0.contains(&target.name) {
                Err(ProbeError::Unhealthy("503".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct CountingSleeper(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for CountingSleeper {
        async fn sleep(&self, d: Duration) {
            self.0.lock().unwrap().push(d);
        }
    }

    fn b(name: &str) -> Target {
        Target::new(name, name, Role::Backend)
    }

    fn controller(
        executor: Arc<Recorder>,
        unhealthy: &[&str],
    ) -> (RollbackController, Arc<CountingSleeper>) {
        let sleeper = Arc::new(CountingSleeper::default());
        let prober = Arc::new(UnhealthySet(unhealthy.iter().map(|s| s.to_string()).collect()));
        let probe = HealthProbe::new(prober).with_sleeper(sleeper.clone());
        let config = RunConfig {
            settle_time: Duration::from_secs(7),
            ..RunConfig::default()
        };
        (
            RollbackController::new(executor, probe, sleeper.clone(), &config),
            sleeper,
        )
    }

    #[test]
    fn failed_target_added_once() {
        let touched = [b("b1"), b("b2")];
        let ctx = RollbackContext { touched: &touched };
        let names: Vec<_> = RollbackController::affected(&touched[1], &ctx)
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, ["b1", "b2"]);

        let lb = Target::new("lb", "A", Role::LoadBalancer);
        assert_eq!(RollbackController::affected(&lb, &ctx).len(), 3);
    }

    #[tokio::test]
    async fn restarts_each_touched_target_once_then_settles() {
        let exec = Arc::new(Recorder::default());
        let (ctl, sleeper) = controller(exec.clone(), &[]);
        let touched = [b("b1"), b("b2")];

        let report = ctl
            .attempt(&touched[1], RollbackContext { touched: &touched })
            .await;
        assert!(report.recovered());
        assert_eq!(
            *exec.calls.lock().unwrap(),
            ["restart-service:b1", "restart-service:b2"]
        );
        // One settle sleep for the whole pass.
        assert_eq!(*sleeper.0.lock().unwrap(), [Duration::from_secs(7)]);
        assert!(report.attempts.iter().all(|a| a.outcome.attempts == 1));
    }

    #[tokio::test]
    async fn unhealthy_after_restart_is_unrecovered() {
        let exec = Arc::new(Recorder::default());
        let (ctl, _) = controller(exec, &["b2"]);
        let touched = [b("b1"), b("b2")];

        let report = ctl
            .attempt(&touched[1], RollbackContext { touched: &touched })
            .await;
        assert_eq!(report.recovery, Recovery::Unrecovered);
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.target.name, "b2");
        assert_eq!(failure.outcome.failure, Some(FailureKind::RollbackFailure));
        assert!(report.attempts[0].outcome.is_pass());
    }

    #[tokio::test]
    async fn failed_restart_is_not_probed() {
        let exec = Arc::new(Recorder {
            fail_on: vec!["b1".into()],
            ..Default::default()
        });
        let (ctl, sleeper) = controller(exec, &[]);
        let touched = [b("b1")];

        let report = ctl
            .attempt(&touched[0], RollbackContext { touched: &touched })
            .await;
        assert!(!report.recovered());
        let outcome = &report.attempts[0].outcome;
        assert!(outcome.last_error.as_deref().unwrap().contains("restart-service failed"));
        // Nothing restarted, so no settle.
        assert!(sleeper.0.lock().unwrap().is_empty());
    }
}
