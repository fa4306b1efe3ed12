use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::health::{HealthCheck, HealthState};
use super::{validate_image, validate_name, validate_ports};
use crate::error::{PodiumError, Result};

/// Single-node orchestrator: every container lives here.
pub const LOCAL_NODE: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ContainerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerState::Pending => "pending",
            ContainerState::Running => "running",
            ContainerState::Succeeded => "succeeded",
            ContainerState::Failed => "failed",
        }
    }

    /// pending -> running -> {succeeded, failed}. running -> running is a restart.
    pub fn can_transition_to(self, next: ContainerState) -> bool {
        use ContainerState::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Running)
                    | (Pending, Failed)
                    | (Running, Succeeded)
                    | (Running, Failed)
            )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ContainerState::Succeeded | ContainerState::Failed)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RestartPolicy {
    #[serde(alias = "always")]
    Always,
    #[serde(alias = "on-failure", alias = "on_failure")]
    OnFailure,
    #[default]
    #[serde(alias = "never", alias = "no")]
    Never,
}

impl RestartPolicy {
    pub fn allows_restart(self) -> bool {
        matches!(self, RestartPolicy::Always | RestartPolicy::OnFailure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    /// 0 lets the engine pick a free host port.
    #[serde(default)]
    pub host_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// CPU cores, 0 for unlimited.
    #[serde(default)]
    pub cpu_limit: f64,
    /// Bytes, 0 for unlimited.
    #[serde(default)]
    pub memory_limit: i64,
}

/// Request to create a standalone container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
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
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

impl ContainerSpec {
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

/// Fields a client may change on an existing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerUpdate {
    pub state: ContainerState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
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
    pub state: ContainerState,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub health: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Copy of the runtime ownership label, for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_index: Option<u32>,
}

impl Container {
    pub fn pending(spec: ContainerSpec, now: DateTime<Utc>) -> Self {
        Container {
            id: Uuid::now_v7().to_string(),
            name: spec.name,
            image: spec.image,
            command: spec.command,
            env: spec.env,
            ports: spec.ports,
            resources: spec.resources,
            state: ContainerState::Pending,
            node_id: LOCAL_NODE.to_string(),
            created_at: now,
            started_at: None,
            finished_at: None,
            restart_policy: spec.restart_policy,
            restart_count: 0,
            health: HealthState::default(),
            health_check: spec.health_check,
            service_id: None,
            replica_index: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.state = ContainerState::Running;
        self.started_at = Some(now);
        self.finished_at = None;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.state = ContainerState::Failed;
        self.finished_at = Some(now);
    }

    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) {
        self.state = ContainerState::Succeeded;
        self.finished_at = Some(now);
    }

    /// Book-keeping after an orchestrator-issued restart succeeded.
    pub fn record_restart(&mut self, now: DateTime<Utc>) {
        self.mark_running(now);
        self.restart_count += 1;
        self.health.start_new_run();
    }

    /// Fails with [`PodiumError::PolicyLimit`] once `restart_count` has
    /// reached `cap`. A cap of 0 means unlimited.
    pub fn check_restart_limit(&self, cap: u32) -> Result<()> {
        if cap > 0 && self.restart_count >= cap {
            return Err(PodiumError::PolicyLimit {
                id: self.id.clone(),
                restarts: self.restart_count,
                cap,
            });
        }
        Ok(())
    }

    /// Explicitly starting a terminal container is the external intervention
    /// that clears a restart-limit breach.
    pub fn revive(&mut self, now: DateTime<Utc>) {
        if self.state.is_terminal() {
            self.restart_count = 0;
            self.health = HealthState::default();
        }
        self.mark_running(now);
    }

    pub fn apply_update(&mut self, update: ContainerUpdate) -> Result<()> {
        if !self.state.can_transition_to(update.state) {
            return Err(PodiumError::validation(format!(
                "container {} cannot move from {} to {}",
                self.id, self.state, update.state
            )));
        }
        self.state = update.state;
        if update.started_at.is_some() {
            self.started_at = update.started_at;
        }
        if update.finished_at.is_some() {
            self.finished_at = update.finished_at;
        }
        Ok(())
    }
}
