//! Targets: the addressable units that make up a fleet.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role a target plays in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Front door: routes external traffic to backends.
    LoadBalancer,
    /// Serves traffic behind the front door; rolled one at a time.
    Backend,
    /// Caller-defined role, updated after backends.
    Custom(String),
}

impl Role {
    /// Whether the engine rolls this role one target at a time.
    pub fn is_backend(&self) -> bool {
        matches!(self, Role::Backend)
    }

    /// Whether this role is the entry point used by the cross-fleet check.
    pub fn is_front_door(&self) -> bool {
        matches!(self, Role::LoadBalancer)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::LoadBalancer => "loadbalancer",
            Role::Backend => "backend",
            Role::Custom(name) => name,
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "loadbalancer" | "load-balancer" | "lb" | "frontend" => Role::LoadBalancer,
            "backend" | "backends" => Role::Backend,
            other => Role::Custom(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::from(s.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One server or service instance taking part in a deployment.
///
/// Targets are immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    /// Host name or IP address.
    pub address: String,
    pub port: Option<u16>,
    pub role: Role,
    /// Liveness path, e.g. `/healthz`.
    pub health_endpoint: Option<String>,
    /// Path checked through this target by the cross-fleet routing check.
    pub route_endpoint: Option<String>,
    /// Opaque service identifier handed to the executor.
    pub service_name: Option<String>,
}

impl Target {
    /// Build a target with only the required fields set.
    pub fn new(name: impl Into<String>, address: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: None,
            role,
            health_endpoint: None,
            route_endpoint: None,
            service_name: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_health_endpoint(mut self, path: impl Into<String>) -> Self {
        self.health_endpoint = Some(path.into());
        self
    }

    pub fn with_route_endpoint(mut self, path: impl Into<String>) -> Self {
        self.route_endpoint = Some(path.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service_name = Some(service.into());
        self
    }

    /// `host:port` authority used for network probes (port 80 if unset).
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port.unwrap_or(80))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.role, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_aliases() {
        assert_eq!(Role::from("lb"), Role::LoadBalancer);
        assert_eq!(Role::from("LoadBalancer"), Role::LoadBalancer);
        assert_eq!(Role::from("frontend"), Role::LoadBalancer);
        assert_eq!(Role::from("backends"), Role::Backend);
        assert_eq!(Role::from("cache"), Role::Custom("cache".to_string()));
    }

    #[test]
    fn role_serializes_as_string() {
        let json = serde_json::to_string(&Role::LoadBalancer).unwrap();
        assert_eq!(json, "\"loadbalancer\"");
        let back: Role = serde_json::from_str("\"worker\"").unwrap();
        assert_eq!(back, Role::Custom("worker".to_string()));
    }

    #[test]
    fn authority_defaults_to_port_80() {
        let t = Target::new("lb", "10.0.0.1", Role::LoadBalancer);
        assert_eq!(t.authority(), "10.0.0.1:80");
        assert_eq!(t.with_port(8080).authority(), "10.0.0.1:8080");
    }

    #[test]
    fn only_backends_roll() {
        assert!(Role::Backend.is_backend());
        assert!(!Role::LoadBalancer.is_backend());
        assert!(!Role::Custom("cache".into()).is_front_door());
    }
}
