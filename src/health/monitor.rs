//! Periodic liveness and health enforcement for stored containers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;

use super::checker::{HealthProbe, ProbeError, ProbeResult};
use crate::background::BackgroundLoop;
use crate::models::{Container, ContainerState, HealthStatus};
use crate::runtime::{Runtime, RuntimeError};
use crate::store::{Records, StoreError};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Upper bound on a single probe, whatever the container declares.
    pub probe_timeout: Duration,
    /// Restart cap per container, 0 for unlimited.
    pub max_restarts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            max_restarts: 5,
        }
    }
}

/// Outcome of the restart gate for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartOutcome {
    /// Restart policy is `Never`.
    NotAllowed,
    Restarted,
    /// Cap reached, container marked failed.
    LimitReached,
    /// Start after stop failed, container marked failed.
    StartFailed,
}

/// What happened to one container during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checked {
    Skipped,
    Probed,
    Restarted,
    Failed,
}

/// Counters for a single tick, mostly for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub probed: usize,
    pub restarted: usize,
    pub failed: usize,
}

pub struct HealthMonitor {
    runtime: Arc<dyn Runtime>,
    records: Records,
    probe: Arc<dyn HealthProbe>,
    config: MonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        records: Records,
        probe: Arc<dyn HealthProbe>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            runtime,
            records,
            probe,
            config,
        }
    }

    pub fn spawn(self: Arc<Self>) -> BackgroundLoop {
        let interval = self.config.interval;
        BackgroundLoop::spawn("health monitor", interval, move || {
            let monitor = Arc::clone(&self);
            async move {
                monitor.check_containers().await;
            }
        })
    }

    /// One monitoring pass over every stored container.
    pub async fn check_containers(&self) -> TickReport {
        let containers: Vec<Container> = match self.records.list().await {
            Ok(containers) => containers,
            Err(e) => {
                log::error!("Error listing containers for health check: {e}");
                return TickReport::default();
            }
        };

        let running: Vec<Container> = containers
            .into_iter()
            .filter(|c| c.state == ContainerState::Running)
            .collect();
        log::debug!("Running health checks on {} containers", running.len());

        let results = join_all(running.into_iter().map(|c| self.check_container(c))).await;

        let mut report = TickReport::default();
        for result in results {
            match result {
                Checked::Skipped => {}
                Checked::Probed => report.probed += 1,
                Checked::Restarted => report.restarted += 1,
                Checked::Failed => report.failed += 1,
            }
        }
        if report != TickReport::default() {
            log::info!(
                "Health checks completed: {} probed, {} restarted, {} failed",
                report.probed,
                report.restarted,
                report.failed
            );
        }
        report
    }

    async fn check_container(&self, mut container: Container) -> Checked {
        let live = match self.runtime.status(&container.id).await {
            Ok(state) => state,
            // Removed behind our back counts as exited.
            Err(RuntimeError::NotFound(_)) => ContainerState::Failed,
            Err(e) if e.is_transient() => {
                log::debug!("Status of container {} timed out, retrying next tick", container.id);
                return Checked::Skipped;
            }
            Err(e) => {
                log::warn!("Error checking status of container {}: {e}", container.id);
                return Checked::Skipped;
            }
        };

        if live != ContainerState::Running {
            log::warn!(
                "Container {} ({}) is not running (state: {live})",
                container.name,
                container.id
            );
            let outcome = self.apply_restart_gate(&mut container).await;
            if matches!(outcome, RestartOutcome::NotAllowed) {
                log::info!(
                    "Not restarting container {} due to restart policy {:?}",
                    container.id,
                    container.restart_policy
                );
                return Checked::Skipped;
            }
            self.persist(&container).await;
            return checked_from(outcome);
        }

        let Some(check) = container.health_check.clone() else {
            return Checked::Skipped;
        };

        let result = match tokio::time::timeout(
            self.config.probe_timeout,
            self.probe.probe(&container),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => ProbeResult::unhealthy(ProbeError::Timeout(self.config.probe_timeout)),
        };

        let now = Utc::now();
        let mut checked = Checked::Probed;
        match result.status {
            HealthStatus::Healthy => container.health.record_success(now),
            HealthStatus::Unhealthy => {
                let run = container.health.record_failure(now);
                if let Some(e) = &result.error {
                    log::warn!("Health check failed for container {}: {e}", container.id);
                }
                if container.health.threshold_reached(check.failure_threshold) {
                    log::warn!(
                        "Container {} failed health check threshold ({run}/{})",
                        container.id,
                        check.failure_threshold
                    );
                    let outcome = self.apply_restart_gate(&mut container).await;
                    if !matches!(outcome, RestartOutcome::NotAllowed) {
                        checked = checked_from(outcome);
                    }
                }
            }
            HealthStatus::Unknown => {
                if let Some(e) = &result.error {
                    log::debug!("Health of container {} unknown: {e}", container.id);
                }
                container.health.record_unknown(now);
            }
        }

        self.persist(&container).await;
        checked
    }

    /// Decides and performs a restart, updating `container` in place.
    /// The caller persists the result.
    async fn apply_restart_gate(&self, container: &mut Container) -> RestartOutcome {
        if !container.restart_policy.allows_restart() {
            return RestartOutcome::NotAllowed;
        }

        if let Err(err) = container.check_restart_limit(self.config.max_restarts) {
            log::error!("{err}, marking it failed");
            container.mark_failed(Utc::now());
            return RestartOutcome::LimitReached;
        }

        log::info!("Restarting container {} ({})", container.name, container.id);
        if let Err(e) = self.runtime.stop(&container.id).await {
            log::warn!("Error stopping container {}: {e}", container.id);
        }
        if let Err(e) = self.runtime.start(&container.id).await {
            log::error!("Error starting container {}: {e}", container.id);
            container.mark_failed(Utc::now());
            return RestartOutcome::StartFailed;
        }

        container.record_restart(Utc::now());
        log::info!(
            "Container {} restarted successfully (restart count: {})",
            container.id,
            container.restart_count
        );
        RestartOutcome::Restarted
    }

    async fn persist(&self, container: &Container) {
        match self.records.update(container).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                log::debug!("Container {} was deleted during its health check", container.id);
            }
            Err(e) => log::error!("Failed to update container {} health state: {e}", container.id),
        }
    }
}

fn checked_from(outcome: RestartOutcome) -> Checked {
    match outcome {
        RestartOutcome::NotAllowed => Checked::Skipped,
        RestartOutcome::Restarted => Checked::Restarted,
        RestartOutcome::LimitReached | RestartOutcome::StartFailed => Checked::Failed,
    }
}
