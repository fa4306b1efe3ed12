use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PodiumError, Result};

fn default_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_success_threshold() -> u32 {
    1
}

fn default_failure_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    Http,
    Tcp,
    Command,
}

/// Declared probe for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub kind: HealthCheckType,
    /// Request path for HTTP probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Container port to probe. Falls back to the first declared port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl HealthCheck {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(PodiumError::validation("failureThreshold must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(PodiumError::validation("successThreshold must be at least 1"));
        }
        if self.kind == HealthCheckType::Command && self.command.is_empty() {
            return Err(PodiumError::validation("command health check requires a command"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe history of a container.
///
/// `consecutive_failures` is the only input to restart decisions; the
/// cumulative counters are informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl HealthState {
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.status = HealthStatus::Healthy;
        self.last_checked = Some(now);
        self.last_success = Some(now);
        self.success_count += 1;
        self.consecutive_failures = 0;
    }

    /// Returns the length of the current failure run.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> u32 {
        self.status = HealthStatus::Unhealthy;
        self.last_checked = Some(now);
        self.last_failure = Some(now);
        self.failure_count += 1;
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    /// A probe that could not be attempted counts neither way.
    pub fn record_unknown(&mut self, now: DateTime<Utc>) {
        self.status = HealthStatus::Unknown;
        self.last_checked = Some(now);
    }

    pub fn threshold_reached(&self, failure_threshold: u32) -> bool {
        self.consecutive_failures >= failure_threshold.max(1)
    }

    /// Called after a restart: the new process starts a fresh run.
    pub fn start_new_run(&mut self) {
        self.status = HealthStatus::Unknown;
        self.consecutive_failures = 0;
    }
}
