//! Container engine capability.
//!
//! The core only talks to the engine through [`Runtime`]. The runtime is the
//! source of truth for whether a container exists and is alive; ownership is
//! recorded as labels on the engine side, never as a stored back-reference.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Container, ContainerState, HealthStatus};

pub mod docker;
#[cfg(test)]
pub mod fake;

pub const LABEL_MANAGED: &str = "podium.managed";
pub const LABEL_CONTAINER_ID: &str = "podium.container.id";
pub const LABEL_SERVICE_ID: &str = "podium.service.id";
pub const LABEL_SERVICE_NAME: &str = "podium.service.name";
pub const LABEL_REPLICA_INDEX: &str = "podium.replica.index";

pub const CREATE_TIMEOUT: Duration = Duration::from_secs(60);
pub const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOGS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container {0} does not exist in the runtime")]
    NotFound(String),
    #[error("{op} of container {id} timed out")]
    Timeout { op: &'static str, id: String },
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),
    #[error("{0}")]
    Engine(String),
}

impl RuntimeError {
    /// Timeouts never decide an entity's long-term state.
    pub fn is_transient(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }
}

/// A live container as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaStatus {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_index: Option<u32>,
    pub state: ContainerState,
    /// `Unknown` when the engine reports no health information.
    pub health: HealthStatus,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    async fn create(&self, spec: &Container) -> Result<(), RuntimeError>;
    async fn start(&self, id: &str) -> Result<(), RuntimeError>;
    /// Stopping an already stopped (or missing) container succeeds.
    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;
    /// Deleting a missing container succeeds.
    async fn delete(&self, id: &str) -> Result<(), RuntimeError>;
    async fn status(&self, id: &str) -> Result<ContainerState, RuntimeError>;
    async fn logs(&self, id: &str) -> Result<String, RuntimeError>;
    async fn restart(&self, id: &str) -> Result<(), RuntimeError>;
    /// Live managed containers, optionally only those owned by `service_id`.
    async fn list_replicas(
        &self,
        service_id: Option<&str>,
    ) -> Result<Vec<ReplicaStatus>, RuntimeError>;
}

/// Bounds a runtime call, mapping elapsed deadlines to [`RuntimeError::Timeout`].
pub(crate) async fn with_timeout<T, F>(
    op: &'static str,
    id: &str,
    limit: Duration,
    fut: F,
) -> Result<T, RuntimeError>
where
    F: std::future::Future<Output = Result<T, RuntimeError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("Runtime {op} of {id} exceeded {limit:?}");
            Err(RuntimeError::Timeout {
                op,
                id: id.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed_deadline() {
        let result: Result<(), RuntimeError> =
            with_timeout("start", "abc", Duration::from_millis(20), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let err = result.expect_err("call should time out");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout("status", "abc", Duration::from_secs(1), async {
            Ok(ContainerState::Running)
        })
        .await;
        assert_eq!(result.expect("no timeout"), ContainerState::Running);
    }
}
