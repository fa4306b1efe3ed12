//! One reconciliation pass: bring every service's live replicas back in
//! line with its record.

use std::collections::HashSet;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;

use super::manager::Tally;
use super::ServiceManager;
use crate::error::Result;
use crate::models::{Container, HealthStatus, Service, ServiceState};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub reconciled: usize,
    pub failed: usize,
    /// Busy with another mutation, or deleted meanwhile.
    pub skipped: usize,
    pub created: usize,
    pub removed: usize,
    pub restarted: usize,
    pub orphans_removed: usize,
}

impl ReconcileSummary {
    fn add(&mut self, tally: Tally) {
        self.created += tally.created;
        self.removed += tally.removed;
        self.restarted += tally.restarted;
    }

    fn is_quiet(&self) -> bool {
        self.failed == 0
            && self.created == 0
            && self.removed == 0
            && self.restarted == 0
            && self.orphans_removed == 0
    }
}

impl ServiceManager {
    /// Reconciles every stored service concurrently, then removes replicas
    /// whose service no longer exists.
    pub async fn reconcile_services(&self) -> Result<ReconcileSummary> {
        let services: Vec<Service> = self.records.list().await?;

        let passes = join_all(services.iter().map(|service| async move {
            let mut tally = Tally::default();
            let result = self.reconcile_service(&service.id, &mut tally).await;
            (tally, result)
        }))
        .await;

        let mut summary = ReconcileSummary::default();
        for (service, (tally, result)) in services.iter().zip(passes) {
            summary.add(tally);
            match result {
                Ok(true) => summary.reconciled += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    log::error!("Error reconciling service {} ({}): {}", service.name, service.id, e);
                    summary.failed += 1;
                }
            }
        }

        match self.sweep_orphans().await {
            Ok(removed) => summary.orphans_removed = removed,
            Err(e) => log::error!("Error sweeping orphaned replicas: {}", e),
        }

        if summary.is_quiet() {
            log::debug!("Reconciled {} services, nothing to do", summary.reconciled);
        } else {
            log::info!(
                "Reconciled {} services ({} failed, {} skipped): {} created, {} removed, {} restarted, {} orphans removed",
                summary.reconciled,
                summary.failed,
                summary.skipped,
                summary.created,
                summary.removed,
                summary.restarted,
                summary.orphans_removed
            );
        }
        Ok(summary)
    }

    /// Returns `Ok(false)` when the service was skipped.
    async fn reconcile_service(&self, id: &str, tally: &mut Tally) -> Result<bool> {
        let Some(guard) = self.locks.try_lock(id).await else {
            log::debug!("Service {} is busy, skipping reconciliation", id);
            return Ok(false);
        };
        // Re-read under the lock; the listed copy may be stale.
        let mut service: Service = match self.records.get(id).await {
            Ok(service) => service,
            Err(StoreError::NotFound { .. }) => {
                drop(guard);
                self.locks.forget(id).await;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let live = self.runtime.list_replicas(Some(&service.id)).await?;
        let live_ids: HashSet<&str> = live.iter().map(|r| r.id.as_str()).collect();

        // Live but not owned: leftovers of interrupted updates or rollbacks.
        for replica in live.iter().filter(|r| !service.container_ids.contains(&r.id)) {
            log::warn!(
                "Removing unowned replica {} ({}) of service {}",
                replica.name,
                replica.id,
                service.name
            );
            self.remove_replica(&replica.id).await?;
            tally.removed += 1;
        }

        // Owned but gone from the runtime: provision again at the same index.
        for index in 0..service.container_ids.len() {
            let stale = service.container_ids[index].clone();
            if live_ids.contains(stale.as_str()) {
                continue;
            }
            log::warn!(
                "Replica {} of service {} ({}) is missing from the runtime",
                index,
                service.name,
                stale
            );
            match self.records.delete::<Container>(&stale).await {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => log::warn!("Failed to drop record of missing container {}: {}", stale, e),
            }
            match self.provision_replica(&service, index as u32).await {
                Ok(container) => {
                    service.container_ids[index] = container.id;
                    tally.created += 1;
                }
                Err(e) => {
                    if let Err(persist) = self.records.update(&service).await {
                        log::error!("Failed to persist service {}: {}", service.id, persist);
                    }
                    return Err(e);
                }
            }
        }

        if service.container_ids.len() != service.replicas as usize {
            log::info!(
                "Service {} has {} replicas, wants {}",
                service.name,
                service.container_ids.len(),
                service.replicas
            );
            let target = service.replicas;
            self.scale_locked(&mut service, target, tally).await?;
        }

        for replica in live.iter().filter(|r| {
            r.health == HealthStatus::Unhealthy && service.container_ids.contains(&r.id)
        }) {
            if self.restart_unhealthy(&replica.id).await? {
                tally.restarted += 1;
            }
        }

        if service.state != ServiceState::Running {
            log::info!("Service {} is running again (was {})", service.name, service.state);
        }
        service.state = ServiceState::Running;
        service.updated_at = Utc::now();
        self.records.update(&service).await?;
        Ok(true)
    }

    /// Restarts a replica the runtime reports unhealthy, unless its record
    /// is terminal. A record at the restart limit is marked failed instead.
    async fn restart_unhealthy(&self, id: &str) -> Result<bool> {
        let mut record: Option<Container> = match self.records.get(id).await {
            Ok(container) => Some(container),
            Err(StoreError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        if record.as_ref().is_some_and(|c| c.state.is_terminal()) {
            log::debug!("Not restarting terminal container {}", id);
            return Ok(false);
        }
        if let Some(container) = record.as_mut() {
            if let Err(err) = container.check_restart_limit(self.max_restarts) {
                log::error!("{err}, marking it failed");
                container.mark_failed(Utc::now());
                match self.records.update(&*container).await {
                    Ok(()) | Err(StoreError::NotFound { .. }) => {}
                    Err(e) => log::warn!("Failed to mark container {} failed: {}", id, e),
                }
                return Ok(false);
            }
        }

        log::info!("Restarting unhealthy container {}", id);
        self.runtime.restart(id).await?;

        if let Some(mut container) = record {
            container.record_restart(Utc::now());
            match self.records.update(&container).await {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => log::warn!("Failed to record restart of container {}: {}", id, e),
            }
        }
        Ok(true)
    }

    /// Removes managed replicas whose service record no longer exists.
    async fn sweep_orphans(&self) -> Result<usize> {
        // Live first: a service's record is always written before its replicas.
        let live = self.runtime.list_replicas(None).await?;
        let services: Vec<Service> = self.records.list().await?;
        let known: HashSet<String> = services.into_iter().map(|s| s.id).collect();

        let mut removed = 0;
        for replica in live {
            let Some(owner) = replica.service_id.as_deref() else {
                continue;
            };
            if known.contains(owner) {
                continue;
            }
            log::warn!(
                "Removing replica {} ({}) of deleted service {}",
                replica.name,
                replica.id,
                owner
            );
            match self.remove_replica(&replica.id).await {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to remove orphaned container {}: {}", replica.id, e),
            }
        }
        Ok(removed)
    }
}
