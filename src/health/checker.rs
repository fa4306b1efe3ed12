//! Single-attempt health probes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::models::{Container, HealthCheckType, HealthStatus};

pub const DEFAULT_PROBE_HOST: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("container has no health check")]
    NoHealthCheck,
    #[error("HTTP health check requires an endpoint")]
    MissingEndpoint,
    #[error("health check has no reachable host port")]
    MissingPort,
    #[error("HTTP health check failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP health check returned status code: {0}")]
    BadStatus(u16),
    #[error("TCP health check failed: {0}")]
    Connect(std::io::Error),
    #[error("health check timed out after {0:?}")]
    Timeout(Duration),
    #[error("command health check not implemented")]
    NotImplemented,
}

#[derive(Debug)]
pub struct ProbeResult {
    pub status: HealthStatus,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            error: None,
        }
    }

    pub fn unhealthy(error: ProbeError) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            error: Some(error),
        }
    }

    /// The probe was not attempted.
    pub fn unknown(error: ProbeError) -> Self {
        Self {
            status: HealthStatus::Unknown,
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, container: &Container) -> ProbeResult;
}

/// Resolves the host-side port a probe should hit.
///
/// The declared port (or the first container port) is translated through the
/// port mappings. An unpublished port or an engine-assigned host port (0)
/// is not reachable from the host, so such containers cannot be probed.
fn probe_port(container: &Container) -> Option<u16> {
    let check = container.health_check.as_ref()?;
    let container_port = check
        .port
        .or_else(|| container.ports.first().map(|p| p.container_port))?;
    container
        .ports
        .iter()
        .find(|p| p.container_port == container_port)
        .map(|mapping| mapping.host_port)
        .filter(|host_port| *host_port != 0)
}

pub struct HealthChecker {
    client: reqwest::Client,
    host: String,
}

impl HealthChecker {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
        }
    }

    async fn check_http(&self, endpoint: Option<&str>, port: u16, timeout: Duration) -> ProbeResult {
        let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) else {
            return ProbeResult::unknown(ProbeError::MissingEndpoint);
        };
        let path = if endpoint.starts_with('/') {
            endpoint.to_string()
        } else {
            format!("/{endpoint}")
        };
        let url = format!("http://{}:{port}{path}", self.host);

        match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..400).contains(&status) {
                    ProbeResult::healthy()
                } else {
                    ProbeResult::unhealthy(ProbeError::BadStatus(status))
                }
            }
            Err(e) if e.is_timeout() => ProbeResult::unhealthy(ProbeError::Timeout(timeout)),
            Err(e) => ProbeResult::unhealthy(ProbeError::Http(e)),
        }
    }

    async fn check_tcp(&self, port: u16, timeout: Duration) -> ProbeResult {
        let addr = format!("{}:{port}", self.host);
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => ProbeResult::healthy(),
            Ok(Err(e)) => ProbeResult::unhealthy(ProbeError::Connect(e)),
            Err(_) => ProbeResult::unhealthy(ProbeError::Timeout(timeout)),
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_HOST)
    }
}

#[async_trait]
impl HealthProbe for HealthChecker {
    async fn probe(&self, container: &Container) -> ProbeResult {
        let Some(check) = container.health_check.as_ref() else {
            return ProbeResult::unknown(ProbeError::NoHealthCheck);
        };
        // Would need exec inside the container.
        if check.kind == HealthCheckType::Command {
            return ProbeResult::unknown(ProbeError::NotImplemented);
        }
        let Some(port) = probe_port(container) else {
            return ProbeResult::unknown(ProbeError::MissingPort);
        };
        match check.kind {
            HealthCheckType::Http => {
                self.check_http(check.endpoint.as_deref(), port, check.timeout())
                    .await
            }
            HealthCheckType::Tcp => self.check_tcp(port, check.timeout()).await,
            HealthCheckType::Command => ProbeResult::unknown(ProbeError::NotImplemented),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerSpec, HealthCheck, PortMapping, Resources, RestartPolicy};
    use axum::{http::StatusCode, routing::get, Router};
    use chrono::Utc;
    use tokio::net::TcpListener;

    fn container_with(check: HealthCheck, ports: Vec<PortMapping>) -> Container {
        let spec = ContainerSpec {
            name: "probe-target".to_string(),
            image: "busybox".to_string(),
            command: vec![],
            env: Default::default(),
            ports,
            resources: Resources::default(),
            restart_policy: RestartPolicy::Always,
            health_check: Some(check),
        };
        Container::pending(spec, Utc::now())
    }

    /// Publishes the checked port on the same host port.
    fn published(check: HealthCheck) -> Container {
        let ports = check
            .port
            .map(|port| PortMapping {
                container_port: port,
                host_port: port,
            })
            .into_iter()
            .collect();
        container_with(check, ports)
    }

    fn check(kind: HealthCheckType, endpoint: Option<&str>, port: Option<u16>) -> HealthCheck {
        HealthCheck {
            kind,
            endpoint: endpoint.map(str::to_string),
            port,
            command: vec![],
            interval_seconds: 30,
            timeout_seconds: 1,
            success_threshold: 1,
            failure_threshold: 3,
        }
    }

    async fn spawn_http() -> u16 {
        let app = Router::new()
            .route("/ok", get(|| async { StatusCode::OK }))
            .route("/moved", get(|| async { StatusCode::NOT_MODIFIED }))
            .route("/broken", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_http_status_classes() {
        let port = spawn_http().await;
        let checker = HealthChecker::default();

        for (path, expected) in [
            ("/ok", HealthStatus::Healthy),
            ("moved", HealthStatus::Healthy),
            ("/broken", HealthStatus::Unhealthy),
            ("/missing", HealthStatus::Unhealthy),
        ] {
            let container = published(check(HealthCheckType::Http, Some(path), Some(port)));
            let result = checker.probe(&container).await;
            assert_eq!(result.status, expected, "path {path}");
        }
    }

    #[tokio::test]
    async fn test_http_connection_refused_is_unhealthy() {
        let port = closed_port().await;
        let container = published(check(HealthCheckType::Http, Some("/"), Some(port)));
        let result = HealthChecker::default().probe(&container).await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_http_without_endpoint_is_not_attempted() {
        let container = published(check(HealthCheckType::Http, None, Some(80)));
        let result = HealthChecker::default().probe(&container).await;
        assert_eq!(result.status, HealthStatus::Unknown);
        assert!(matches!(result.error, Some(ProbeError::MissingEndpoint)));
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let checker = HealthChecker::default();

        let open = published(check(HealthCheckType::Tcp, None, Some(port)));
        assert_eq!(checker.probe(&open).await.status, HealthStatus::Healthy);

        drop(listener);
        let closed = published(check(HealthCheckType::Tcp, None, Some(port)));
        assert_eq!(checker.probe(&closed).await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_command_probe_not_implemented() {
        let mut probe = check(HealthCheckType::Command, None, None);
        probe.command = vec!["true".to_string()];
        let result = HealthChecker::default()
            .probe(&container_with(probe, vec![]))
            .await;
        assert_eq!(result.status, HealthStatus::Unknown);
        assert!(matches!(result.error, Some(ProbeError::NotImplemented)));
    }

    #[test]
    fn test_probe_port_maps_to_host_port() {
        let ports = vec![PortMapping {
            container_port: 80,
            host_port: 8080,
        }];
        let container = container_with(check(HealthCheckType::Tcp, None, None), ports);
        assert_eq!(probe_port(&container), Some(8080));
    }

    #[test]
    fn test_probe_port_unknown_for_engine_assigned_port() {
        let ports = vec![PortMapping {
            container_port: 80,
            host_port: 0,
        }];
        let container = container_with(check(HealthCheckType::Tcp, Some("/"), Some(80)), ports);
        assert_eq!(probe_port(&container), None);
    }

    #[tokio::test]
    async fn test_unpublished_port_is_not_attempted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let ports = vec![PortMapping {
            container_port: 9000,
            host_port: 9000,
        }];
        let container = container_with(check(HealthCheckType::Tcp, None, Some(port)), ports);
        assert_eq!(probe_port(&container), None);

        let result = HealthChecker::default().probe(&container).await;
        assert_eq!(result.status, HealthStatus::Unknown);
        assert!(matches!(result.error, Some(ProbeError::MissingPort)));
    }

    #[test]
    fn test_probe_port_missing_everywhere() {
        let container = container_with(check(HealthCheckType::Tcp, None, None), vec![]);
        assert_eq!(probe_port(&container), None);
    }
}
