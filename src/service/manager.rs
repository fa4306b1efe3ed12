use chrono::Utc;
use serde::Serialize;

use super::ServiceManager;
use crate::error::Result;
use crate::models::{surplus_replicas, HealthStatus, Service, ServiceSpec, ServiceState};
use crate::runtime::ReplicaStatus;

/// Live view of a service, built from the runtime rather than the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub service_id: String,
    pub name: String,
    pub state: ServiceState,
    pub desired_replicas: u32,
    pub current_replicas: usize,
    pub healthy_replicas: usize,
    pub replicas: Vec<ReplicaStatus>,
}

/// Result of a delete sweep. The service record is gone either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub removed: usize,
    pub failed: usize,
}

/// Replica changes made by one call, used to build reconcile summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct Tally {
    pub created: usize,
    pub removed: usize,
    pub restarted: usize,
}

impl ServiceManager {
    pub async fn create_service(&self, spec: ServiceSpec) -> Result<Service> {
        spec.validate()?;
        let mut service = Service::new(spec, Utc::now());
        let _guard = self.locks.lock(&service.id).await;

        self.records.create(&service).await?;
        log::info!(
            "Creating service {} ({}) with {} replicas",
            service.name,
            service.id,
            service.replicas
        );

        for index in 0..service.replicas {
            match self.provision_replica(&service, index).await {
                Ok(container) => service.container_ids.push(container.id),
                Err(e) => {
                    log::error!(
                        "Failed to create replica {} of service {}: {}",
                        index,
                        service.name,
                        e
                    );
                    self.abandon_create(&service).await;
                    return Err(e);
                }
            }
        }

        service.state = ServiceState::Running;
        service.updated_at = Utc::now();
        if let Err(e) = self.records.update(&service).await {
            log::error!("Failed to store service {}: {}", service.name, e);
            self.abandon_create(&service).await;
            return Err(e.into());
        }
        log::info!("Service {} created successfully", service.name);
        Ok(service)
    }

    /// Undoes a create that cannot finish: replicas, the record and the lock
    /// entry all go.
    async fn abandon_create(&self, service: &Service) {
        self.roll_back(&service.container_ids).await;
        if let Err(cleanup) = self.records.delete::<Service>(&service.id).await {
            log::warn!("Rollback could not remove service {}: {}", service.id, cleanup);
        }
        self.locks.forget(&service.id).await;
    }

    pub async fn scale_service(&self, id: &str, replicas: u32) -> Result<Service> {
        let (_guard, mut service) = self.lock_service(id).await?;
        log::info!(
            "Scaling service {} from {} to {} replicas",
            service.name,
            service.container_ids.len(),
            replicas
        );
        self.scale_locked(&mut service, replicas, &mut Tally::default())
            .await?;
        Ok(service)
    }

    /// Moves the owned list toward `target`. The caller holds the lock.
    ///
    /// Whatever was achieved before a failure is persisted before the error
    /// is returned.
    pub(super) async fn scale_locked(
        &self,
        service: &mut Service,
        target: u32,
        tally: &mut Tally,
    ) -> Result<()> {
        service.replicas = target;
        service.updated_at = Utc::now();

        let current = service.container_ids.len();
        let target_len = target as usize;
        let outcome = if target_len > current {
            self.grow(service, tally).await
        } else {
            self.shrink(service, target_len, tally).await
        };
        if outcome.is_ok() {
            service.state = ServiceState::Running;
        }

        let persisted = self.records.update(service).await;
        outcome?;
        persisted?;
        Ok(())
    }

    async fn grow(&self, service: &mut Service, tally: &mut Tally) -> Result<()> {
        for index in service.container_ids.len() as u32..service.replicas {
            let container = self.provision_replica(service, index).await?;
            service.container_ids.push(container.id);
            tally.created += 1;
        }
        Ok(())
    }

    async fn shrink(&self, service: &mut Service, target: usize, tally: &mut Tally) -> Result<()> {
        for (index, id) in surplus_replicas(&service.container_ids, target) {
            self.remove_replica(&id).await?;
            service.container_ids.truncate(index);
            tally.removed += 1;
        }
        Ok(())
    }

    /// Replaces the template and recreates every replica from it.
    ///
    /// If the new set cannot be built, the replicas made so far are removed
    /// and the service is left `failed` with no replicas for reconciliation
    /// to provision.
    pub async fn update_service(&self, id: &str, spec: ServiceSpec) -> Result<Service> {
        spec.validate()?;
        let (_guard, mut service) = self.lock_service(id).await?;
        log::info!("Updating service {} ({})", service.name, service.id);

        let old = std::mem::take(&mut service.container_ids);
        for container_id in old.iter().rev() {
            // Leftovers keep their ownership label; reconciliation removes them.
            if let Err(e) = self.remove_replica(container_id).await {
                log::warn!(
                    "Failed to remove container {} of service {}: {}",
                    container_id,
                    service.name,
                    e
                );
            }
        }

        service.apply_template(spec, Utc::now());
        service.state = ServiceState::Creating;
        self.records.update(&service).await?;

        for index in 0..service.replicas {
            match self.provision_replica(&service, index).await {
                Ok(container) => service.container_ids.push(container.id),
                Err(e) => {
                    log::error!(
                        "Failed to recreate replica {} of service {}: {}",
                        index,
                        service.name,
                        e
                    );
                    self.roll_back(&service.container_ids).await;
                    service.container_ids.clear();
                    service.state = ServiceState::Failed;
                    service.updated_at = Utc::now();
                    if let Err(cleanup) = self.records.update(&service).await {
                        log::error!("Failed to mark service {} failed: {}", service.id, cleanup);
                    }
                    return Err(e);
                }
            }
        }

        service.state = ServiceState::Running;
        service.updated_at = Utc::now();
        self.records.update(&service).await?;
        log::info!("Service {} updated successfully", service.name);
        Ok(service)
    }

    /// Best-effort removal of every replica, then of the service record.
    pub async fn delete_service(&self, id: &str) -> Result<DeleteReport> {
        let (guard, service) = self.lock_service(id).await?;
        log::info!("Deleting service {} ({})", service.name, service.id);

        let mut report = DeleteReport::default();
        let mut leftovers = 0;
        for container_id in service.container_ids.iter().rev() {
            match self.remove_replica(container_id).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    log::warn!("Failed to remove container {}: {}", container_id, e);
                    leftovers += 1;
                }
            }
        }

        // Second sweep: anything still carrying the ownership label.
        match self.runtime.list_replicas(Some(&service.id)).await {
            Ok(live) => {
                for replica in live {
                    match self.remove_replica(&replica.id).await {
                        Ok(()) => report.removed += 1,
                        Err(e) => {
                            log::error!("Container {} survived deletion: {}", replica.id, e);
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                log::error!("Could not list leftovers of service {}: {}", service.id, e);
                report.failed += leftovers;
            }
        }

        self.records.delete::<Service>(&service.id).await?;
        drop(guard);
        self.locks.forget(&service.id).await;

        if report.failed > 0 {
            log::warn!(
                "Service {} deleted, {} containers could not be removed",
                service.name,
                report.failed
            );
        } else {
            log::info!("Service {} deleted successfully", service.name);
        }
        Ok(report)
    }

    pub async fn get_service_status(&self, id: &str) -> Result<ServiceStatus> {
        let service: Service = self.records.get(id).await?;
        let mut replicas = self.runtime.list_replicas(Some(&service.id)).await?;
        replicas.sort_by_key(|r| (r.replica_index.unwrap_or(u32::MAX), r.id.clone()));

        let healthy_replicas = replicas
            .iter()
            .filter(|r| r.health == HealthStatus::Healthy)
            .count();
        Ok(ServiceStatus {
            service_id: service.id,
            name: service.name,
            state: service.state,
            desired_replicas: service.replicas,
            current_replicas: replicas.len(),
            healthy_replicas,
            replicas,
        })
    }

    pub async fn get_service(&self, id: &str) -> Result<Service> {
        Ok(self.records.get(id).await?)
    }

    pub async fn list_services(&self, state: Option<ServiceState>) -> Result<Vec<Service>> {
        let mut services: Vec<Service> = self.records.list().await?;
        if let Some(state) = state {
            services.retain(|s| s.state == state);
        }
        services.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(services)
    }
}
