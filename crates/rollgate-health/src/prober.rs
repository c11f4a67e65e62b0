//! Capability traits the probe loop is built on.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use rollgate_core::Target;

/// What a single check is asked to confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    /// The target itself answers its health endpoint or service check.
    Liveness,
    /// A request through this (front-door) target reaches a backend.
    Route,
}

/// Why one probe attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The target could not be reached at all.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The target answered but reported itself unhealthy.
    #[error("unhealthy: {0}")]
    Unhealthy(String),

    /// The attempt exceeded its per-attempt timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The target has neither a health endpoint nor a service to check.
    #[error("target '{0}' has no health endpoint or service name")]
    NotProbeable(String),
}

impl ProbeError {
    /// The target could not be reached, as opposed to answering badly or slowly.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ProbeError::Unreachable(_))
    }
}

/// Performs one read-only check against a target.
///
/// Implementations must not change the target's state; the probe loop may
/// call them any number of times up to the policy's attempt budget.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn check(&self, target: &Target, kind: CheckKind) -> Result<(), ProbeError>;
}

/// Sleep abstraction so retry delays can be observed in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
