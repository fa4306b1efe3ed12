use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async lock per service ID.
///
/// Every mutation of a service runs under its lock; unrelated services
/// never contend.
#[derive(Default)]
pub(crate) struct ServiceLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ServiceLocks {
    async fn slot(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    pub(crate) async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        self.slot(id).await.lock_owned().await
    }

    /// `None` if another mutation of `id` is in flight.
    pub(crate) async fn try_lock(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        self.slot(id).await.try_lock_owned().ok()
    }

    /// Drops the entry of a deleted service.
    pub(crate) async fn forget(&self, id: &str) {
        self.locks.lock().await.remove(id);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
