//! rollgate-health: bounded health probing for Rollgate.
//!
//! Provides the [`HealthProbe`] retry loop, the [`Prober`] capability it
//! drives, and an HTTP implementation of that capability.
//!
//! # Architecture
//!
//! ```text
//! HealthProbe
//!   ├── Prober (one read-only check: HTTP, service command, fake)
//!   ├── per-attempt tokio timeout
//!   └── Sleeper (retry delay; swapped out in tests)
//! ```
//!
//! A probe makes at most `max_attempts` checks, sleeps `retry_delay`
//! between them, and never sleeps after the last one.

pub mod http;
pub mod probe;
pub mod prober;

pub use http::{HttpProber, http_probe};
pub use probe::{HealthProbe, ProbeVerdict};
pub use prober::{CheckKind, ProbeError, Prober, Sleeper, TokioSleeper};
