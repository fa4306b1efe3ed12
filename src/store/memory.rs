use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Namespace, Store, StoreError};

/// Non-durable store. Used for `store = "memory"` and in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<(Namespace, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(ns: Namespace, id: &str) -> StoreError {
    StoreError::NotFound {
        namespace: ns,
        id: id.to_string(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, ns: Namespace, id: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let key = (ns, id.to_string());
        if entries.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                namespace: ns,
                id: id.to_string(),
            });
        }
        entries.insert(key, value);
        Ok(())
    }

    async fn replace(&self, ns: Namespace, id: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&(ns, id.to_string())) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(not_found(ns, id)),
        }
    }

    async fn get(&self, ns: Namespace, id: &str) -> Result<Vec<u8>, StoreError> {
        self.entries
            .read()
            .await
            .get(&(ns, id.to_string()))
            .cloned()
            .ok_or_else(|| not_found(ns, id))
    }

    async fn list(&self, ns: Namespace) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|((entry_ns, _), _)| *entry_ns == ns)
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn remove(&self, ns: Namespace, id: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .remove(&(ns, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(ns, id))
    }
}
