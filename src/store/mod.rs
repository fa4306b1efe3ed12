//! Durable record storage.
//!
//! Backends implement the byte-level [`Store`] trait over two independent
//! namespaces. [`Records`] layers typed JSON records on top. The store holds
//! declared intent; whether a container actually exists is the runtime's call.
//!
//! Writes are plain overwrites: two writers racing on one record means the
//! later one wins. `replace` refuses records that were deleted meanwhile.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::error::RecordKind;
use crate::models::{Container, Service};

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Containers,
    Services,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Containers => "containers",
            Namespace::Services => "services",
        }
    }

    pub fn record_kind(self) -> RecordKind {
        match self {
            Namespace::Containers => RecordKind::Container,
            Namespace::Services => RecordKind::Service,
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{id} not found in {namespace}")]
    NotFound { namespace: Namespace, id: String },
    #[error("{id} already exists in {namespace}")]
    AlreadyExists { namespace: Namespace, id: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `AlreadyExists` if the key is taken.
    async fn insert(&self, ns: Namespace, id: &str, value: Vec<u8>) -> Result<(), StoreError>;
    /// Fails with `NotFound` if the key is absent.
    async fn replace(&self, ns: Namespace, id: &str, value: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, ns: Namespace, id: &str) -> Result<Vec<u8>, StoreError>;
    /// Full scan, no pagination.
    async fn list(&self, ns: Namespace) -> Result<Vec<Vec<u8>>, StoreError>;
    async fn remove(&self, ns: Namespace, id: &str) -> Result<(), StoreError>;
}

pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const NAMESPACE: Namespace;
    fn id(&self) -> &str;
}

impl Record for Container {
    const NAMESPACE: Namespace = Namespace::Containers;
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Service {
    const NAMESPACE: Namespace = Namespace::Services;
    fn id(&self) -> &str {
        &self.id
    }
}

/// Typed access to container and service records.
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn Store>,
}

impl Records {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create<T: Record>(&self, record: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.store.insert(T::NAMESPACE, record.id(), bytes).await
    }

    pub async fn get<T: Record>(&self, id: &str) -> Result<T, StoreError> {
        let bytes = self.store.get(T::NAMESPACE, id).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list<T: Record>(&self) -> Result<Vec<T>, StoreError> {
        let mut records = Vec::new();
        for bytes in self.store.list(T::NAMESPACE).await? {
            match serde_json::from_slice(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => log::error!("Skipping unreadable record in {}: {e}", T::NAMESPACE),
            }
        }
        Ok(records)
    }

    pub async fn update<T: Record>(&self, record: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.store.replace(T::NAMESPACE, record.id(), bytes).await
    }

    pub async fn delete<T: Record>(&self, id: &str) -> Result<(), StoreError> {
        self.store.remove(T::NAMESPACE, id).await
    }
}
