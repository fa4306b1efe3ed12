//! The Service Manager: service lifecycle, replica bookkeeping and
//! reconciliation against the runtime.
//!
//! The store says what should exist, the runtime says what does. Every
//! operation here reads intent from [`Records`], acts through [`Runtime`],
//! and writes the resulting intent back.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::error::Result;
use crate::models::Service;
use crate::runtime::Runtime;
use crate::store::{Records, StoreError};

mod containers;
mod locks;
mod manager;
mod reconcile;
mod reconciler;
mod replicas;

pub use manager::{DeleteReport, ServiceStatus};
pub use reconcile::ReconcileSummary;
pub use reconciler::{Reconciler, TriggerOutcome};

use locks::ServiceLocks;

pub struct ServiceManager {
    runtime: Arc<dyn Runtime>,
    records: Records,
    locks: ServiceLocks,
    /// Restart cap shared with the health monitor, 0 for unlimited.
    max_restarts: u32,
}

impl ServiceManager {
    pub fn new(runtime: Arc<dyn Runtime>, records: Records, max_restarts: u32) -> Self {
        Self {
            runtime,
            records,
            locks: ServiceLocks::default(),
            max_restarts,
        }
    }

    /// Takes the lock of an existing service and reads its record under it.
    /// Unknown IDs leave no lock entry behind.
    async fn lock_service(&self, id: &str) -> Result<(OwnedMutexGuard<()>, Service)> {
        self.records.get::<Service>(id).await?;
        let guard = self.locks.lock(id).await;
        match self.records.get::<Service>(id).await {
            Ok(service) => Ok((guard, service)),
            Err(e) => {
                drop(guard);
                if matches!(e, StoreError::NotFound { .. }) {
                    self.locks.forget(id).await;
                }
                Err(e.into())
            }
        }
    }
}
