//! Docker runtime using bollard.
//!
//! Containers are created under their orchestrator ID, so every call below
//! addresses the engine with the same ID the store uses. Ownership travels as
//! `podium.*` labels, which is what [`Runtime::list_replicas`] filters on.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, HealthConfig, HealthStatusEnum, HostConfig, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateContainerOptionsBuilder, InspectContainerOptions,
    InspectContainerOptionsBuilder, ListContainersOptions, ListContainersOptionsBuilder,
    LogsOptions, LogsOptionsBuilder, RemoveContainerOptions, RemoveContainerOptionsBuilder,
    RestartContainerOptions, RestartContainerOptionsBuilder, StartContainerOptions,
    StartContainerOptionsBuilder, StopContainerOptions, StopContainerOptionsBuilder,
};
use futures_util::StreamExt;

use super::{
    with_timeout, ReplicaStatus, Runtime, RuntimeError, CREATE_TIMEOUT, INSPECT_TIMEOUT,
    LABEL_CONTAINER_ID, LABEL_MANAGED, LABEL_REPLICA_INDEX, LABEL_SERVICE_ID, LABEL_SERVICE_NAME,
    LIFECYCLE_TIMEOUT, LOGS_TIMEOUT,
};
use crate::models::{Container, ContainerState, HealthCheck, HealthCheckType, HealthStatus};

/// Seconds the engine waits for a graceful stop before killing.
const STOP_GRACE_SECS: i32 = 10;
const LOG_TAIL_LINES: &str = "100";
const NANOS_PER_SEC: i64 = 1_000_000_000;

fn is_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects with the local defaults (Unix socket on Linux/macOS, named
    /// pipe on Windows) and checks the daemon answers.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        with_timeout("ping", "daemon", INSPECT_TIMEOUT, async {
            docker.ping().await?;
            Ok(())
        })
        .await?;
        log::info!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    async fn inspect(
        &self,
        id: &str,
    ) -> Result<bollard::models::ContainerInspectResponse, RuntimeError> {
        let options: InspectContainerOptions = InspectContainerOptionsBuilder::new().build();
        match self.docker.inspect_container(id, Some(options)).await {
            Ok(info) => Ok(info),
            Err(e) if is_status(&e, 404) => Err(RuntimeError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

fn labels_for(spec: &Container) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
    labels.insert(LABEL_CONTAINER_ID.to_string(), spec.id.clone());
    if let Some(service_id) = &spec.service_id {
        labels.insert(LABEL_SERVICE_ID.to_string(), service_id.clone());
        // The replica name is "<service>-<index>".
        if let Some(index) = spec.replica_index {
            let suffix = format!("-{index}");
            let service_name = spec.name.strip_suffix(&suffix).unwrap_or(&spec.name);
            labels.insert(LABEL_SERVICE_NAME.to_string(), service_name.to_string());
            labels.insert(LABEL_REPLICA_INDEX.to_string(), index.to_string());
        }
    }
    labels
}

/// Mirrors HTTP/TCP probes as an engine-side HEALTHCHECK so that the engine
/// can report replica health on its own.
fn engine_healthcheck(spec: &Container) -> Option<HealthConfig> {
    let check: &HealthCheck = spec.health_check.as_ref()?;
    let port = check
        .port
        .or_else(|| spec.ports.first().map(|p| p.container_port))?;
    let test = match check.kind {
        HealthCheckType::Http => {
            let endpoint = check.endpoint.as_deref().unwrap_or("/");
            let endpoint = if endpoint.starts_with('/') {
                endpoint.to_string()
            } else {
                format!("/{endpoint}")
            };
            format!("curl -f http://localhost:{port}{endpoint} || exit 1")
        }
        HealthCheckType::Tcp => format!("nc -z localhost {port} || exit 1"),
        HealthCheckType::Command => check.command.join(" "),
    };
    Some(HealthConfig {
        test: Some(vec!["CMD-SHELL".to_string(), test]),
        interval: Some(check.interval_seconds.max(1) as i64 * NANOS_PER_SEC),
        timeout: Some(check.timeout_seconds.max(1) as i64 * NANOS_PER_SEC),
        retries: Some(check.failure_threshold as i64),
        ..Default::default()
    })
}

fn container_body(spec: &Container) -> ContainerCreateBody {
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: Vec<String> = Vec::new();

    for port in &spec.ports {
        let container_port = format!("{}/tcp", port.container_port);
        exposed_ports.push(container_port.clone());
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(port.host_port.to_string()),
            }]),
        );
    }

    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let memory = (spec.resources.memory_limit > 0).then_some(spec.resources.memory_limit);
    let nano_cpus = (spec.resources.cpu_limit > 0.0)
        .then(|| (spec.resources.cpu_limit * NANOS_PER_SEC as f64) as i64);

    // Restarts are decided by the health monitor, never by the engine.
    let host_config = HostConfig {
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        }),
        memory,
        nano_cpus,
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        env: (!env.is_empty()).then_some(env),
        cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        labels: Some(labels_for(spec)),
        healthcheck: engine_healthcheck(spec),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn map_state(state: Option<&bollard::models::ContainerState>) -> ContainerState {
    match state {
        Some(state) if state.running.unwrap_or(false) => ContainerState::Running,
        Some(state) if state.exit_code.unwrap_or(-1) == 0 => ContainerState::Succeeded,
        _ => ContainerState::Failed,
    }
}

fn map_health(state: Option<&bollard::models::ContainerState>) -> HealthStatus {
    let status = state
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status);
    match status {
        Some(HealthStatusEnum::HEALTHY) => HealthStatus::Healthy,
        Some(HealthStatusEnum::UNHEALTHY) => HealthStatus::Unhealthy,
        _ => HealthStatus::Unknown,
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn create(&self, spec: &Container) -> Result<(), RuntimeError> {
        log::info!("Creating container {} ({}) from {}", spec.name, spec.id, spec.image);
        with_timeout("create", &spec.id, CREATE_TIMEOUT, async {
            let options: CreateContainerOptions =
                CreateContainerOptionsBuilder::new().name(&spec.id).build();
            self.docker
                .create_container(Some(options), container_body(spec))
                .await
                .inspect_err(|e| log::error!("Failed to create container {}: {}", spec.name, e))?;
            Ok(())
        })
        .await
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        with_timeout("start", id, LIFECYCLE_TIMEOUT, async {
            let options: StartContainerOptions = StartContainerOptionsBuilder::new().build();
            match self.docker.start_container(id, Some(options)).await {
                Ok(_) => {
                    log::info!("Container {id} started successfully");
                    Ok(())
                }
                Err(e) if is_status(&e, 304) => {
                    log::info!("Container {id} already running");
                    Ok(())
                }
                Err(e) if is_status(&e, 404) => Err(RuntimeError::NotFound(id.to_string())),
                Err(e) => {
                    log::error!("Failed to start container {id}: {e}");
                    Err(e.into())
                }
            }
        })
        .await
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        with_timeout("stop", id, LIFECYCLE_TIMEOUT, async {
            let options: StopContainerOptions =
                StopContainerOptionsBuilder::new().t(STOP_GRACE_SECS).build();
            match self.docker.stop_container(id, Some(options)).await {
                Ok(_) => {
                    log::info!("Container {id} stopped successfully");
                    Ok(())
                }
                Err(e) if is_status(&e, 404) => {
                    log::warn!("Container {id} not found, skipping stop");
                    Ok(())
                }
                Err(e) if is_status(&e, 304) => {
                    log::info!("Container {id} already stopped");
                    Ok(())
                }
                Err(e) => {
                    log::warn!("Failed to stop container {id}: {e}");
                    Err(e.into())
                }
            }
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), RuntimeError> {
        with_timeout("delete", id, LIFECYCLE_TIMEOUT, async {
            let options: RemoveContainerOptions =
                RemoveContainerOptionsBuilder::new().force(true).build();
            match self.docker.remove_container(id, Some(options)).await {
                Ok(_) => {
                    log::info!("Container {id} removed successfully");
                    Ok(())
                }
                Err(e) if is_status(&e, 404) => {
                    log::info!("Container {id} not found, skipping removal");
                    Ok(())
                }
                Err(e) => {
                    log::error!("Failed to remove container {id}: {e}");
                    Err(e.into())
                }
            }
        })
        .await
    }

    async fn status(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        with_timeout("status", id, INSPECT_TIMEOUT, async {
            let info = self.inspect(id).await?;
            let state = map_state(info.state.as_ref());
            log::debug!("Container {id} status: {state}");
            Ok(state)
        })
        .await
    }

    async fn logs(&self, id: &str) -> Result<String, RuntimeError> {
        with_timeout("logs", id, LOGS_TIMEOUT, async {
            let options: LogsOptions = LogsOptionsBuilder::new()
                .stdout(true)
                .stderr(true)
                .tail(LOG_TAIL_LINES)
                .build();
            let mut stream = self.docker.logs(id, Some(options));
            let mut logs = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(output) => logs.push_str(&output.to_string()),
                    Err(e) if is_status(&e, 404) => {
                        return Err(RuntimeError::NotFound(id.to_string()));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            log::debug!("Read {} bytes of logs for container {id}", logs.len());
            Ok(logs)
        })
        .await
    }

    async fn restart(&self, id: &str) -> Result<(), RuntimeError> {
        with_timeout("restart", id, LIFECYCLE_TIMEOUT, async {
            let options: RestartContainerOptions =
                RestartContainerOptionsBuilder::new().t(STOP_GRACE_SECS).build();
            match self.docker.restart_container(id, Some(options)).await {
                Ok(_) => {
                    log::info!("Container {id} restarted");
                    Ok(())
                }
                Err(e) if is_status(&e, 404) => Err(RuntimeError::NotFound(id.to_string())),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn list_replicas(
        &self,
        service_id: Option<&str>,
    ) -> Result<Vec<ReplicaStatus>, RuntimeError> {
        let scope = service_id.unwrap_or("all services");
        with_timeout("list", scope, INSPECT_TIMEOUT, async {
            let label = match service_id {
                Some(service_id) => format!("{LABEL_SERVICE_ID}={service_id}"),
                None => format!("{LABEL_MANAGED}=true"),
            };
            let mut filters: HashMap<String, Vec<String>> = HashMap::new();
            filters.insert("label".to_string(), vec![label]);
            let options: ListContainersOptions = ListContainersOptionsBuilder::new()
                .all(true)
                .filters(&filters)
                .build();

            let summaries = self.docker.list_containers(Some(options)).await?;
            let mut replicas = Vec::with_capacity(summaries.len());
            for summary in summaries {
                let Some(engine_id) = summary.id else {
                    continue;
                };
                // The container may vanish between list and inspect.
                let info = match self.inspect(&engine_id).await {
                    Ok(info) => info,
                    Err(RuntimeError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                };
                let labels = info
                    .config
                    .as_ref()
                    .and_then(|c| c.labels.clone())
                    .unwrap_or_default();
                let id = labels
                    .get(LABEL_CONTAINER_ID)
                    .cloned()
                    .unwrap_or_else(|| engine_id.clone());
                replicas.push(ReplicaStatus {
                    name: info
                        .name
                        .as_deref()
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_else(|| id.clone()),
                    id,
                    service_id: labels.get(LABEL_SERVICE_ID).cloned(),
                    replica_index: labels
                        .get(LABEL_REPLICA_INDEX)
                        .and_then(|i| i.parse().ok()),
                    state: map_state(info.state.as_ref()),
                    health: map_health(info.state.as_ref()),
                });
            }
            Ok(replicas)
        })
        .await
    }
}
