//! rollgate-core: fleet model and configuration for Rollgate.
//!
//! Holds the types every other crate shares: [`Target`] and [`Role`], the
//! [`HealthCheckPolicy`] retry parameters, the fleet file parser, the
//! resolved [`RunConfig`], and the read-only [`TargetRegistry`].

pub mod config;
pub mod duration;
pub mod error;
pub mod policy;
pub mod registry;
pub mod target;

pub use config::{ActionNames, FleetFile, RunConfig, RunOptions, actions};
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use policy::HealthCheckPolicy;
pub use registry::{TargetRegistry, TargetSource};
pub use target::{Role, Target};
