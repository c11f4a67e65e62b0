//! Rollout plans: which targets a run checks and changes, in what order.

use std::fmt;

use serde::{Deserialize, Serialize};

use rollgate_core::{ConfigError, ConfigResult, RunConfig, Target, TargetRegistry};

use crate::run::PhaseKind;

/// How much of the fleet a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Pre-validate, roll backends, update other roles, post-validate.
    Full,
    /// Backends only; no cross-fleet check.
    Backends,
    /// Front door only, gated on healthy backends.
    FrontDoor,
    /// Only the cross-fleet routing check.
    PostValidateOnly,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Full => "check",
            Scope::Backends => "backend",
            Scope::FrontDoor => "frontend",
            Scope::PostValidateOnly => "api",
        })
    }
}

/// A pre-validation probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCheck {
    pub target: Target,
    pub gating: bool,
}

/// What a sequential step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Deploy,
    HealthGate,
    PostValidate,
}

impl StepKind {
    pub fn phase(&self) -> PhaseKind {
        match self {
            StepKind::Deploy => PhaseKind::Deploy,
            StepKind::HealthGate => PhaseKind::HealthGate,
            StepKind::PostValidate => PhaseKind::PostValidate,
        }
    }
}

/// A sequential step after pre-validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub target: Target,
    pub gating: bool,
}

/// Ordered work for one run.
///
/// Backend updates come first, one target at a time (deploy then health
/// gate), then the remaining roles, then post-validation. Pre-validation
/// checks are independent of each other and may run concurrently.
#[derive(Debug, Clone)]
pub struct Plan {
    pub scope: Scope,
    pub pre_validate: Vec<PlannedCheck>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn build(
        registry: &TargetRegistry,
        scope: Scope,
        config: &RunConfig,
    ) -> ConfigResult<Self> {
        let advisory_pre = config.advisory_pre_validate;
        let post_gating = !config.advisory_post_validate;

        let mut pre_validate = Vec::new();
        let mut steps = Vec::new();

        match scope {
            Scope::Full => {
                pre_validate.extend(registry.targets().iter().map(|t| PlannedCheck {
                    target: t.clone(),
                    gating: !advisory_pre,
                }));
                push_updates(&mut steps, registry.backends());
                push_updates(&mut steps, registry.front_doors());
                push_updates(&mut steps, registry.others());
                push_post_validate(&mut steps, registry.front_doors(), post_gating);
            }
            Scope::Backends => {
                if registry.backends().next().is_none() {
                    return Err(ConfigError::EmptyPlan("no backend targets".to_string()));
                }
                pre_validate.extend(registry.backends().map(|t| PlannedCheck {
                    target: t.clone(),
                    gating: !advisory_pre,
                }));
                push_updates(&mut steps, registry.backends());
            }
            Scope::FrontDoor => {
                if registry.front_doors().next().is_none() {
                    return Err(ConfigError::EmptyPlan("no front-door targets".to_string()));
                }
                // The front door must only route to healthy backends.
                pre_validate.extend(registry.targets().iter().map(|t| PlannedCheck {
                    target: t.clone(),
                    gating: t.role.is_backend() || !advisory_pre,
                }));
                push_updates(&mut steps, registry.front_doors());
                push_post_validate(&mut steps, registry.front_doors(), post_gating);
            }
            Scope::PostValidateOnly => {
                if registry.front_doors().next().is_none() {
                    return Err(ConfigError::EmptyPlan("no front-door targets".to_string()));
                }
                push_post_validate(&mut steps, registry.front_doors(), post_gating);
            }
        }

        Ok(Self {
            scope,
            pre_validate,
            steps,
        })
    }

    /// Targets that receive an update action, in order.
    pub fn update_targets(&self) -> impl Iterator<Item = &Target> {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Deploy)
            .map(|s| &s.target)
    }

    pub fn has_updates(&self) -> bool {
        self.update_targets().next().is_some()
    }
}

fn push_updates<'a>(steps: &mut Vec<Step>, targets: impl Iterator<Item = &'a Target>) {
    for target in targets {
        for kind in [StepKind::Deploy, StepKind::HealthGate] {
            steps.push(Step {
                kind,
                target: target.clone(),
                gating: true,
            });
        }
    }
}

fn push_post_validate<'a>(
    steps: &mut Vec<Step>,
    front_doors: impl Iterator<Item = &'a Target>,
    gating: bool,
) {
    steps.extend(front_doors.map(|t| Step {
        kind: StepKind::PostValidate,
        target: t.clone(),
        gating,
    }));
}
