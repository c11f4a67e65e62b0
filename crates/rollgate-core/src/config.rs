//! Fleet file parser and the resolved per-run configuration.
//!
//! ```toml
//! [options]
//! max_attempts = 3
//! retry_delay = "10s"
//!
//! [commands]
//! deploy = "ssh {address} sudo /opt/deploy.sh"
//!
//! [targets]
//! loadbalancer = [{ name = "lb", address = "10.0.0.1", health_path = "/healthz" }]
//! backend = [{ address = "10.0.0.2", port = 8080, health_path = "/health" }]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration;
use crate::error::{ConfigError, ConfigResult};
use crate::policy::HealthCheckPolicy;
use crate::target::{Role, Target};

/// Action names understood by executors.
pub mod actions {
    pub const DEPLOY: &str = "deploy";
    pub const RESTART_SERVICE: &str = "restart-service";
    pub const RELOAD_PROXY: &str = "reload-proxy";
    pub const CHECK_SERVICE: &str = "check-service";
}

/// The on-disk fleet file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetFile {
    #[serde(default)]
    pub options: RunOptions,
    /// Transport command templates keyed by action name.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    /// Role name → ordered list of target entries. Role order is preserved.
    #[serde(default)]
    pub targets: toml::Table,
}

/// One entry in a role's target list.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetEntry {
    name: Option<String>,
    address: Option<String>,
    port: Option<u16>,
    health_path: Option<String>,
    route_path: Option<String>,
    service: Option<String>,
}

impl FleetFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Flatten `[targets]` into an ordered target list.
    pub fn target_list(&self) -> ConfigResult<Vec<Target>> {
        let mut out = Vec::new();
        for (role_name, value) in &self.targets {
            let role = Role::from(role_name.as_str());
            let entries = value.as_array().ok_or_else(|| ConfigError::MalformedTarget {
                role: role_name.clone(),
                reason: "expected an array of target tables".to_string(),
            })?;

            for (index, raw) in entries.iter().enumerate() {
                let entry: TargetEntry =
                    raw.clone()
                        .try_into()
                        .map_err(|e: toml::de::Error| ConfigError::MalformedTarget {
                            role: role_name.clone(),
                            reason: format!("entry {index}: {}", e.message()),
                        })?;
                out.push(entry.into_target(role_name, index, role.clone())?);
            }
        }
        Ok(out)
    }
}

impl TargetEntry {
    fn into_target(self, role_name: &str, index: usize, role: Role) -> ConfigResult<Target> {
        let address = self
            .address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ConfigError::MalformedTarget {
                role: role_name.to_string(),
                reason: format!("entry {index}: missing address"),
            })?;

        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => match self.port {
                Some(port) => format!("{address}:{port}"),
                None => address.clone(),
            },
        };

        Ok(Target {
            name,
            address,
            port: self.port,
            role,
            health_endpoint: self.health_path.map(normalize_path),
            route_endpoint: self.route_path.map(normalize_path),
            service_name: self.service,
        })
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// Per-run options as written in `[options]` or passed on the command line.
///
/// Every field is optional; unset fields fall back to [`RunConfig::default`].
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunOptions {
    pub max_attempts: Option<u32>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub retry_delay: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub per_attempt_timeout: Option<Duration>,
    pub pre_validate_attempts: Option<u32>,
    pub post_validate_attempts: Option<u32>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub execute_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub settle_time: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub run_timeout: Option<Duration>,
    pub advisory_pre_validate: Option<bool>,
    pub advisory_post_validate: Option<bool>,
}

impl RunOptions {
    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merged_with(self, overrides: RunOptions) -> RunOptions {
        RunOptions {
            max_attempts: overrides.max_attempts.or(self.max_attempts),
            retry_delay: overrides.retry_delay.or(self.retry_delay),
            per_attempt_timeout: overrides.per_attempt_timeout.or(self.per_attempt_timeout),
            pre_validate_attempts: overrides.pre_validate_attempts.or(self.pre_validate_attempts),
            post_validate_attempts: overrides
                .post_validate_attempts
                .or(self.post_validate_attempts),
            execute_timeout: overrides.execute_timeout.or(self.execute_timeout),
            settle_time: overrides.settle_time.or(self.settle_time),
            run_timeout: overrides.run_timeout.or(self.run_timeout),
            advisory_pre_validate: overrides.advisory_pre_validate.or(self.advisory_pre_validate),
            advisory_post_validate: overrides
                .advisory_post_validate
                .or(self.advisory_post_validate),
        }
    }

    /// Resolve into an immutable [`RunConfig`], validating every policy.
    pub fn resolve(&self) -> ConfigResult<RunConfig> {
        let defaults = RunConfig::default();

        let retry_delay = self
            .retry_delay
            .unwrap_or(defaults.update_policy.retry_delay());
        let per_attempt_timeout = self
            .per_attempt_timeout
            .unwrap_or(defaults.update_policy.per_attempt_timeout());

        let update_policy = HealthCheckPolicy::new(
            self.max_attempts
                .unwrap_or(defaults.update_policy.max_attempts()),
            retry_delay,
            per_attempt_timeout,
        )?;
        let pre_validate_policy = HealthCheckPolicy::new(
            self.pre_validate_attempts
                .unwrap_or(defaults.pre_validate_policy.max_attempts()),
            retry_delay,
            per_attempt_timeout,
        )?;
        let post_validate_policy = HealthCheckPolicy::new(
            self.post_validate_attempts
                .unwrap_or(defaults.post_validate_policy.max_attempts()),
            retry_delay,
            per_attempt_timeout,
        )?;

        let run_timeout = self.run_timeout.unwrap_or(defaults.run_timeout);
        if run_timeout.is_zero() {
            return Err(ConfigError::InvalidPolicy(
                "run_timeout must be greater than zero".to_string(),
            ));
        }
        let execute_timeout = self.execute_timeout.unwrap_or(defaults.execute_timeout);
        if execute_timeout.is_zero() {
            return Err(ConfigError::InvalidPolicy(
                "execute_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(RunConfig {
            update_policy,
            pre_validate_policy,
            post_validate_policy,
            recovery_policy: update_policy,
            execute_timeout,
            settle_time: self.settle_time.unwrap_or(defaults.settle_time),
            run_timeout,
            advisory_pre_validate: self
                .advisory_pre_validate
                .unwrap_or(defaults.advisory_pre_validate),
            advisory_post_validate: self
                .advisory_post_validate
                .unwrap_or(defaults.advisory_post_validate),
            actions: defaults.actions,
        })
    }
}

/// Which executor action each step issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionNames {
    /// Update action for backends and caller-defined roles.
    pub deploy: String,
    /// Update action for the front door.
    pub front_door: String,
    /// Recovery action issued by the rollback pass.
    pub recover: String,
}

impl ActionNames {
    pub fn update_action(&self, role: &Role) -> &str {
        if role.is_front_door() {
            &self.front_door
        } else {
            &self.deploy
        }
    }
}

impl Default for ActionNames {
    fn default() -> Self {
        Self {
            deploy: actions::DEPLOY.to_string(),
            front_door: actions::RELOAD_PROXY.to_string(),
            recover: actions::RESTART_SERVICE.to_string(),
        }
    }
}

/// Immutable configuration handed to the rollout engine at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    /// Health gate after each target update.
    pub update_policy: HealthCheckPolicy,
    /// Best-effort probe of the fleet before anything changes.
    pub pre_validate_policy: HealthCheckPolicy,
    /// Cross-fleet routing check through the front door.
    pub post_validate_policy: HealthCheckPolicy,
    /// Probe run once per target after the recovery action.
    pub recovery_policy: HealthCheckPolicy,
    /// Ceiling on a single executor call.
    pub execute_timeout: Duration,
    /// Pause between recovery actions and recovery probes.
    pub settle_time: Duration,
    /// Wall-clock ceiling for the whole run.
    pub run_timeout: Duration,
    pub advisory_pre_validate: bool,
    pub advisory_post_validate: bool,
    pub actions: ActionNames,
}

impl Default for RunConfig {
    fn default() -> Self {
        let update_policy = HealthCheckPolicy::default();
        Self {
            update_policy,
            pre_validate_policy: HealthCheckPolicy::new(
                1,
                Duration::ZERO,
                HealthCheckPolicy::DEFAULT_PER_ATTEMPT_TIMEOUT,
            )
            .unwrap_or(update_policy),
            post_validate_policy: update_policy.with_max_attempts(5).unwrap_or(update_policy),
            recovery_policy: update_policy,
            execute_timeout: Duration::from_secs(120),
            settle_time: Duration::from_secs(5),
            run_timeout: Duration::from_secs(30 * 60),
            advisory_pre_validate: true,
            advisory_post_validate: false,
            actions: ActionNames::default(),
        }
    }
}
