//! Creating and removing single replicas, with their compensations.

use chrono::Utc;

use super::ServiceManager;
use crate::error::Result;
use crate::models::{Container, Service};
use crate::store::StoreError;

impl ServiceManager {
    /// Creates, starts and records replica `index` of `service`.
    ///
    /// On failure nothing of this replica is left behind: a created runtime
    /// container is deleted again before the error is returned.
    pub(super) async fn provision_replica(&self, service: &Service, index: u32) -> Result<Container> {
        let mut container = service.replica(index, Utc::now());
        log::debug!(
            "Creating replica {} of service {} as {}",
            index,
            service.id,
            container.id
        );

        self.runtime.create(&container).await?;

        if let Err(e) = self.runtime.start(&container.id).await {
            log::error!("Failed to start replica {}: {}", container.name, e);
            self.discard_runtime_container(&container.id).await;
            return Err(e.into());
        }
        container.mark_running(Utc::now());

        if let Err(e) = self.records.create(&container).await {
            log::error!("Failed to store replica {}: {}", container.name, e);
            self.discard_runtime_container(&container.id).await;
            return Err(e.into());
        }

        log::info!("Replica {} ({}) is running", container.name, container.id);
        Ok(container)
    }

    /// Stops and deletes a replica, then drops its record.
    ///
    /// Stop failures are not fatal. If the runtime refuses the delete the
    /// record is kept so a later pass can retry.
    pub(super) async fn remove_replica(&self, id: &str) -> Result<()> {
        if let Err(e) = self.runtime.stop(id).await {
            log::warn!("Failed to stop container {}: {}", id, e);
        }
        self.runtime.delete(id).await?;
        match self.records.delete::<Container>(id).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        log::info!("Container {} removed", id);
        Ok(())
    }

    /// Removes replicas created by a call that is failing. Errors are logged
    /// and never replace the failure being rolled back.
    pub(super) async fn roll_back(&self, ids: &[String]) {
        for id in ids.iter().rev() {
            if let Err(e) = self.remove_replica(id).await {
                log::warn!("Rollback could not remove container {}: {}", id, e);
            }
        }
    }

    async fn discard_runtime_container(&self, id: &str) {
        if let Err(e) = self.runtime.stop(id).await {
            log::warn!("Cleanup failed: could not stop container {}: {}", id, e);
        }
        if let Err(e) = self.runtime.delete(id).await {
            log::warn!("Cleanup failed: could not delete container {}: {}", id, e);
        }
    }
}
