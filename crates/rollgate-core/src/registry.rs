//! Target registry: the read-only fleet view a run works from.

use std::collections::HashSet;

use tracing::debug;

use crate::config::FleetFile;
use crate::error::{ConfigError, ConfigResult};
use crate::target::{Role, Target};

/// Anything that can produce the ordered target list for a fleet.
pub trait TargetSource {
    fn load_targets(&self) -> ConfigResult<Vec<Target>>;
}

impl TargetSource for FleetFile {
    fn load_targets(&self) -> ConfigResult<Vec<Target>> {
        self.target_list()
    }
}

impl TargetSource for Vec<Target> {
    fn load_targets(&self) -> ConfigResult<Vec<Target>> {
        Ok(self.clone())
    }
}

impl TargetSource for [Target] {
    fn load_targets(&self) -> ConfigResult<Vec<Target>> {
        Ok(self.to_vec())
    }
}

/// Ordered, immutable set of targets. Never empty.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    /// Load and validate targets from `source`.
    ///
    /// Fails with [`ConfigError::Empty`] when the source yields no targets and
    /// with [`ConfigError::DuplicateTarget`] when two targets share a name.
    pub fn load<S: TargetSource + ?Sized>(source: &S) -> ConfigResult<Self> {
        let targets = source.load_targets()?;
        if targets.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut seen = HashSet::new();
        for target in &targets {
            if target.address.trim().is_empty() {
                return Err(ConfigError::MalformedTarget {
                    role: target.role.to_string(),
                    reason: format!("target '{}' has no address", target.name),
                });
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }
        }

        debug!(count = targets.len(), "target registry loaded");
        Ok(Self { targets })
    }

    /// All targets in insertion order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Targets with `role`, in insertion order.
    pub fn targets_by_role<'a>(&'a self, role: &'a Role) -> impl Iterator<Item = &'a Target> + 'a {
        self.targets.iter().filter(move |t| &t.role == role)
    }

    pub fn backends(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.role.is_backend())
    }

    pub fn front_doors(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.role.is_front_door())
    }

    /// Targets that are neither backends nor front doors.
    pub fn others(&self) -> impl Iterator<Item = &Target> {
        self.targets
            .iter()
            .filter(|t| !t.role.is_backend() && !t.role.is_front_door())
    }

    pub fn get(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Always false for a loaded registry.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> Vec<Target> {
        vec![
            Target::new("lb", "10.0.0.1", Role::LoadBalancer),
            Target::new("b1", "10.0.0.2", Role::Backend),
            Target::new("cache", "10.0.0.9", Role::Custom("cache".into())),
            Target::new("b2", "10.0.0.3", Role::Backend),
        ]
    }

    #[test]
    fn load_keeps_insertion_order() {
        let reg = TargetRegistry::load(&fleet()).unwrap();
        let names: Vec<_> = reg.targets().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["lb", "b1", "cache", "b2"]);
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn by_role_is_stable() {
        let reg = TargetRegistry::load(&fleet()).unwrap();
        let backends: Vec<_> = reg
            .targets_by_role(&Role::Backend)
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(backends, ["b1", "b2"]);
        assert_eq!(reg.front_doors().count(), 1);
        assert_eq!(reg.others().next().unwrap().name, "cache");
    }

    #[test]
    fn empty_source_is_config_error() {
        let err = TargetRegistry::load(&Vec::<Target>::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Empty));
    }

    #[test]
    fn empty_fleet_file_is_config_error() {
        let file = FleetFile::parse("[targets]\nbackend = []\n").unwrap();
        assert!(matches!(TargetRegistry::load(&file), Err(ConfigError::Empty)));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut targets = fleet();
        targets.push(Target::new("b1", "10.0.0.4", Role::Backend));
        let err = TargetRegistry::load(&targets).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTarget(name) if name == "b1"));
    }

    #[test]
    fn blank_address_rejected() {
        let targets = vec![Target::new("b1", " ", Role::Backend)];
        assert!(matches!(
            TargetRegistry::load(&targets),
            Err(ConfigError::MalformedTarget { .. })
        ));
    }

    #[test]
    fn load_from_fleet_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollgate.toml");
        std::fs::write(
            &path,
            "[targets]\nbackend = [{ address = \"10.0.0.2\" }, { address = \"10.0.0.3\" }]\n",
        )
        .unwrap();

        let file = FleetFile::from_file(&path).unwrap();
        let reg = TargetRegistry::load(&file).unwrap();
        assert_eq!(reg.backends().count(), 2);
        assert!(reg.get("10.0.0.3").is_some());
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::path::Path::new("/nonexistent/rollgate.toml");
        let err = FleetFile::from_file(path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
