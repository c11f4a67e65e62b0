//! Shell-command transport for actions and service checks.
//!
//! Each action name maps to a command template from `[commands]`. The
//! rendered command runs under `sh -c`; exit status 255 is what `ssh`
//! returns when it cannot reach the host, so it is reported as unreachable.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use rollgate_core::{Target, actions};
use rollgate_health::{CheckKind, HttpProber, ProbeError, Prober};
use rollgate_rollout::{ExecuteError, Executor};

const UNREACHABLE_EXIT: i32 = 255;
const STDERR_TAIL_LINES: usize = 3;

/// Runs `[commands]` templates through the local shell.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    templates: BTreeMap<String, String>,
}

impl CommandExecutor {
    pub fn new(templates: BTreeMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.templates.contains_key(action)
    }

    /// Substitute `{name}`, `{address}`, `{port}`, `{role}` and `{service}`.
    pub fn render(template: &str, target: &Target) -> String {
        template
            .replace("{name}", &target.name)
            .replace("{address}", &target.address)
            .replace(
                "{port}",
                &target.port.map(|p| p.to_string()).unwrap_or_default(),
            )
            .replace("{role}", target.role.as_str())
            .replace("{service}", target.service_name.as_deref().unwrap_or(""))
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, target: &Target, action: &str) -> Result<(), ExecuteError> {
        let template = self
            .templates
            .get(action)
            .ok_or_else(|| ExecuteError::Failed(format!("no command configured for '{action}'")))?;
        let command = Self::render(template, target);
        debug!(target = %target.name, action, %command, "running action command");

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecuteError::Unreachable(format!("failed to spawn sh: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let tail = stderr_tail(&output.stderr);
        match output.status.code() {
            Some(UNREACHABLE_EXIT) => Err(ExecuteError::Unreachable(tail)),
            _ if tail.is_empty() => Err(ExecuteError::Failed(output.status.to_string())),
            _ => Err(ExecuteError::Failed(format!("{}: {tail}", output.status))),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("; ")
}

/// HTTP for targets with an endpoint, the `check-service` command otherwise.
pub struct FleetProber {
    http: HttpProber,
    commands: Arc<CommandExecutor>,
}

impl FleetProber {
    pub fn new(commands: Arc<CommandExecutor>, request_timeout: Duration) -> Self {
        Self {
            http: HttpProber::new(request_timeout),
            commands,
        }
    }
}

#[async_trait]
impl Prober for FleetProber {
    async fn check(&self, target: &Target, kind: CheckKind) -> Result<(), ProbeError> {
        if HttpProber::path_for(target, kind).is_some() {
            return self.http.check(target, kind).await;
        }
        if target.service_name.is_none() || !self.commands.has_action(actions::CHECK_SERVICE) {
            return Err(ProbeError::NotProbeable(target.name.clone()));
        }
        self.commands
            .execute(target, actions::CHECK_SERVICE)
            .await
            .map_err(|e| match e {
                ExecuteError::Unreachable(reason) => ProbeError::Unreachable(reason),
                ExecuteError::Failed(reason) => ProbeError::Unhealthy(reason),
            })
    }
}
