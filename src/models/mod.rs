//! Records persisted by the store and exchanged with the HTTP surface.
//!
//! Everything here is plain data plus the small state machines that guard it.
//! Records serialize as camelCase JSON, one self-describing entry per ID.

mod container;
mod health;
mod service;

pub use container::{
    Container, ContainerSpec, ContainerState, ContainerUpdate, PortMapping, Resources,
    RestartPolicy,
};
pub use health::{HealthCheck, HealthCheckType, HealthState, HealthStatus};
pub use service::{surplus_replicas, Service, ServiceSpec, ServiceState};

use crate::error::{PodiumError, Result};

const MAX_NAME_LEN: usize = 63;

/// Names end up inside container names, so keep them DNS-label shaped.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PodiumError::validation("name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(PodiumError::validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(PodiumError::validation(format!(
            "name {name:?} may only contain lowercase letters, digits and '-'"
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(PodiumError::validation(format!(
            "name {name:?} must not start or end with '-'"
        )));
    }
    Ok(())
}

pub(crate) fn validate_image(image: &str) -> Result<()> {
    if image.trim().is_empty() {
        return Err(PodiumError::validation("image is required"));
    }
    Ok(())
}

pub(crate) fn validate_ports(ports: &[PortMapping]) -> Result<()> {
    for port in ports {
        if port.container_port == 0 {
            return Err(PodiumError::validation("container port must be in 1..=65535"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["web", "web-1", "a", "api-gateway-2"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        let too_long = "a".repeat(64);
        for name in ["", "Web", "web_1", "-web", "web-", "web app", too_long.as_str()] {
            assert!(validate_name(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_zero_container_port_rejected() {
        let ports = vec![PortMapping {
            container_port: 0,
            host_port: 8080,
        }];
        assert!(validate_ports(&ports).is_err());
    }
}
