//! Executor: the capability that changes a target.
//!
//! The engine only needs `execute(target, action)` to run to completion (or
//! fail) before returning. How the action reaches the target (SSH, an agent,
//! a local process) is the implementor's business.

use async_trait::async_trait;
use thiserror::Error;

use rollgate_core::Target;

/// Why an action did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
    /// The target could not be reached; the action never started.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The action ran and reported failure.
    #[error("{0}")]
    Failed(String),
}

/// Runs a named action (`deploy`, `restart-service`, `reload-proxy`, ...) on one target.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, target: &Target, action: &str) -> Result<(), ExecuteError>;
}
