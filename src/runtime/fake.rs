//! In-memory engine for tests, with failure injection.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ReplicaStatus, Runtime, RuntimeError};
use crate::models::{Container, ContainerState, HealthStatus};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: Container,
    pub state: ContainerState,
    pub health: HealthStatus,
    pub restarts: u32,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, FakeContainer>,
    creates: usize,
    fail_create_after: Option<usize>,
    fail_start_names: HashSet<String>,
    fail_delete_names: HashSet<String>,
    flaky_delete_names: HashSet<String>,
    fail_list: bool,
}

#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// The create call after `n` successful ones fails.
    pub async fn fail_create_after(&self, n: usize) {
        let mut inner = self.inner.lock().await;
        inner.fail_create_after = Some(inner.creates + n);
    }

    pub async fn fail_start_of(&self, name: &str) {
        self.inner.lock().await.fail_start_names.insert(name.to_string());
    }

    pub async fn allow_start_of(&self, name: &str) {
        self.inner.lock().await.fail_start_names.remove(name);
    }

    pub async fn fail_delete_of(&self, name: &str) {
        self.inner.lock().await.fail_delete_names.insert(name.to_string());
    }

    /// Only the next delete of `name` fails.
    pub async fn fail_next_delete_of(&self, name: &str) {
        self.inner
            .lock()
            .await
            .flaky_delete_names
            .insert(name.to_string());
    }

    pub async fn allow_delete_of(&self, name: &str) {
        self.inner.lock().await.fail_delete_names.remove(name);
    }

    pub async fn fail_list(&self, fail: bool) {
        self.inner.lock().await.fail_list = fail;
    }

    /// Simulates a process exit outside orchestrator control.
    pub async fn crash(&self, id: &str) {
        if let Some(c) = self.inner.lock().await.containers.get_mut(id) {
            c.state = ContainerState::Failed;
        }
    }

    /// Simulates a container removed behind the orchestrator's back.
    pub async fn vanish(&self, id: &str) {
        self.inner.lock().await.containers.remove(id);
    }

    pub async fn set_health(&self, id: &str, health: HealthStatus) {
        if let Some(c) = self.inner.lock().await.containers.get_mut(id) {
            c.health = health;
        }
    }

    /// Adds a container the store knows nothing about.
    pub async fn adopt(&self, spec: Container) {
        let id = spec.id.clone();
        self.inner.lock().await.containers.insert(
            id,
            FakeContainer {
                spec,
                state: ContainerState::Running,
                health: HealthStatus::Unknown,
                restarts: 0,
            },
        );
    }

    pub async fn get(&self, id: &str) -> Option<FakeContainer> {
        self.inner.lock().await.containers.get(id).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .await
            .containers
            .values()
            .map(|c| c.spec.name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.containers.len()
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn create(&self, spec: &Container) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_create_after == Some(inner.creates) {
            inner.fail_create_after = None;
            return Err(RuntimeError::Engine(format!("create of {} refused", spec.name)));
        }
        inner.creates += 1;
        inner.containers.insert(
            spec.id.clone(),
            FakeContainer {
                spec: spec.clone(),
                state: ContainerState::Pending,
                health: HealthStatus::Unknown,
                restarts: 0,
            },
        );
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        let Inner {
            containers,
            fail_start_names,
            ..
        } = &mut *inner;
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if fail_start_names.contains(&container.spec.name) {
            return Err(RuntimeError::Engine(format!("start of {id} refused")));
        }
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        if let Some(c) = self.inner.lock().await.containers.get_mut(id) {
            if c.state == ContainerState::Running {
                c.state = ContainerState::Succeeded;
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        let Some(name) = inner.containers.get(id).map(|c| c.spec.name.clone()) else {
            return Ok(());
        };
        if inner.flaky_delete_names.remove(&name) || inner.fail_delete_names.contains(&name) {
            return Err(RuntimeError::Engine(format!("delete of {id} refused")));
        }
        inner.containers.remove(id);
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        self.inner
            .lock()
            .await
            .containers
            .get(id)
            .map(|c| c.state)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn logs(&self, id: &str) -> Result<String, RuntimeError> {
        let inner = self.inner.lock().await;
        let c = inner
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        Ok(format!("{} says hello\n", c.spec.name))
    }

    async fn restart(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        let c = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        c.state = ContainerState::Running;
        c.health = HealthStatus::Unknown;
        c.restarts += 1;
        Ok(())
    }

    async fn list_replicas(
        &self,
        service_id: Option<&str>,
    ) -> Result<Vec<ReplicaStatus>, RuntimeError> {
        let inner = self.inner.lock().await;
        if inner.fail_list {
            return Err(RuntimeError::Engine("list refused".to_string()));
        }
        Ok(inner
            .containers
            .values()
            .filter(|c| match service_id {
                Some(service_id) => c.spec.service_id.as_deref() == Some(service_id),
                None => true,
            })
            .map(|c| ReplicaStatus {
                id: c.spec.id.clone(),
                name: c.spec.name.clone(),
                service_id: c.spec.service_id.clone(),
                replica_index: c.spec.replica_index,
                state: c.state,
                health: c.health,
            })
            .collect())
    }
}
