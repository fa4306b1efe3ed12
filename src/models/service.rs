use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::container::{Container, ContainerSpec, PortMapping, Resources, RestartPolicy};
use super::health::HealthCheck;
use super::{validate_image, validate_name, validate_ports};
use crate::error::Result;

pub const ENV_SERVICE_ID: &str = "PODIUM_SERVICE_ID";
pub const ENV_SERVICE_NAME: &str = "PODIUM_SERVICE_NAME";
pub const ENV_REPLICA_INDEX: &str = "PODIUM_REPLICA_INDEX";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Creating,
    Running,
    Stopped,
    Failed,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Creating => "creating",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared template of a service, as submitted on create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

fn default_replicas() -> u32 {
    1
}

impl ServiceSpec {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_image(&self.image)?;
        validate_ports(&self.ports)?;
        if let Some(check) = &self.health_check {
            check.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub resources: Resources,
    pub replicas: u32,
    pub state: ServiceState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Owned replicas, position == replica index.
    #[serde(default)]
    pub container_ids: Vec<String>,
}

impl Service {
    pub fn new(spec: ServiceSpec, now: DateTime<Utc>) -> Self {
        Service {
            id: Uuid::now_v7().to_string(),
            name: spec.name,
            image: spec.image,
            command: spec.command,
            env: spec.env,
            ports: spec.ports,
            resources: spec.resources,
            replicas: spec.replicas,
            state: ServiceState::Creating,
            created_at: now,
            updated_at: now,
            restart_policy: spec.restart_policy,
            health_check: spec.health_check,
            container_ids: Vec::new(),
        }
    }

    /// Replaces the template. Owned replicas are left to the caller.
    pub fn apply_template(&mut self, spec: ServiceSpec, now: DateTime<Utc>) {
        self.name = spec.name;
        self.image = spec.image;
        self.command = spec.command;
        self.env = spec.env;
        self.ports = spec.ports;
        self.resources = spec.resources;
        self.replicas = spec.replicas;
        self.restart_policy = spec.restart_policy;
        self.health_check = spec.health_check;
        self.updated_at = now;
    }

    pub fn replica_name(&self, index: u32) -> String {
        format!("{}-{}", self.name, index)
    }

    /// Builds the pending record for replica `index` from the current template.
    pub fn replica(&self, index: u32, now: DateTime<Utc>) -> Container {
        let mut env = self.env.clone();
        env.insert(ENV_SERVICE_ID.to_string(), self.id.clone());
        env.insert(ENV_SERVICE_NAME.to_string(), self.name.clone());
        env.insert(ENV_REPLICA_INDEX.to_string(), index.to_string());

        // Only the first replica may claim the declared host ports.
        let ports = self
            .ports
            .iter()
            .map(|port| PortMapping {
                container_port: port.container_port,
                host_port: if index == 0 { port.host_port } else { 0 },
            })
            .collect();

        let spec = ContainerSpec {
            name: self.replica_name(index),
            image: self.image.clone(),
            command: self.command.clone(),
            env,
            ports,
            resources: self.resources,
            restart_policy: self.restart_policy,
            health_check: self.health_check.clone(),
        };
        let mut container = Container::pending(spec, now);
        container.service_id = Some(self.id.clone());
        container.replica_index = Some(index);
        container
    }
}

/// Replicas a shrink to `target` removes, highest index first.
pub fn surplus_replicas(owned: &[String], target: usize) -> Vec<(usize, String)> {
    owned
        .iter()
        .enumerate()
        .skip(target)
        .rev()
        .map(|(index, id)| (index, id.clone()))
        .collect()
}
