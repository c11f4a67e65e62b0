//! The bounded retry loop.
//!
//! ```text
//! attempt 1 ─fail─▶ sleep(retry_delay) ─▶ attempt 2 ─fail─▶ ... ─▶ attempt N ─fail─▶ Unhealthy
//!     │                                       │                        │
//!     └─ok─▶ Healthy                          └─ok─▶ Healthy           └─ok─▶ Healthy
//! ```
//!
//! Each attempt is capped by `per_attempt_timeout`. There is no sleep after
//! the final attempt, and `max_attempts` is a hard ceiling.

use std::sync::Arc;

use tracing::{debug, warn};

use rollgate_core::{HealthCheckPolicy, Target};

use crate::prober::{CheckKind, ProbeError, Prober, Sleeper, TokioSleeper};

/// Result of a full probe (all attempts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Healthy { attempts: u32 },
    Unhealthy { attempts: u32, last_error: ProbeError },
}

impl ProbeVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeVerdict::Healthy { .. })
    }

    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        match self {
            ProbeVerdict::Healthy { attempts } | ProbeVerdict::Unhealthy { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn last_error(&self) -> Option<&ProbeError> {
        match self {
            ProbeVerdict::Healthy { .. } => None,
            ProbeVerdict::Unhealthy { last_error, .. } => Some(last_error),
        }
    }
}

/// Repeatedly checks one target until healthy or out of attempts.
#[derive(Clone)]
pub struct HealthProbe {
    prober: Arc<dyn Prober>,
    sleeper: Arc<dyn Sleeper>,
}

impl HealthProbe {
    /// Probe with real tokio sleeps between attempts.
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self {
            prober,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Liveness probe of `target`.
    pub async fn probe(&self, target: &Target, policy: &HealthCheckPolicy) -> ProbeVerdict {
        self.check(target, CheckKind::Liveness, policy).await
    }

    /// End-to-end routing probe through a front-door `target`.
    pub async fn probe_route(&self, target: &Target, policy: &HealthCheckPolicy) -> ProbeVerdict {
        self.check(target, CheckKind::Route, policy).await
    }

    pub async fn check(
        &self,
        target: &Target,
        kind: CheckKind,
        policy: &HealthCheckPolicy,
    ) -> ProbeVerdict {
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;

        loop {
            match self.attempt(target, kind, policy).await {
                Ok(()) => {
                    debug!(target = %target.name, ?kind, attempt, "probe healthy");
                    return ProbeVerdict::Healthy { attempts: attempt };
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        target = %target.name,
                        ?kind,
                        attempts = attempt,
                        error = %e,
                        "probe attempts exhausted"
                    );
                    return ProbeVerdict::Unhealthy {
                        attempts: attempt,
                        last_error: e,
                    };
                }
                Err(e) => {
                    debug!(
                        target = %target.name,
                        ?kind,
                        attempt,
                        max_attempts,
                        error = %e,
                        "probe attempt failed, retrying"
                    );
                    self.sleeper.sleep(policy.retry_delay()).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        target: &Target,
        kind: CheckKind,
        policy: &HealthCheckPolicy,
    ) -> Result<(), ProbeError> {
        let timeout = policy.per_attempt_timeout();
        match tokio::time::timeout(timeout, self.prober.check(target, kind)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        }
    }
}
