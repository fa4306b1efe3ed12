//! Direct operations on single container records, outside any service.

use chrono::Utc;

use super::ServiceManager;
use crate::error::Result;
use crate::models::{Container, ContainerSpec, ContainerState, ContainerUpdate, HealthState};

impl ServiceManager {
    /// Creates a standalone container in the runtime and records it as
    /// pending. It is not started.
    pub async fn create_container(&self, spec: ContainerSpec) -> Result<Container> {
        spec.validate()?;
        let container = Container::pending(spec, Utc::now());

        self.runtime.create(&container).await?;
        if let Err(e) = self.records.create(&container).await {
            log::error!("Storing container {} failed: {}", container.id, e);
            if let Err(cleanup) = self.runtime.delete(&container.id).await {
                log::warn!(
                    "Cleanup failed: could not delete container {}: {}",
                    container.id,
                    cleanup
                );
            }
            return Err(e.into());
        }

        log::info!("Container {} created ({})", container.name, container.id);
        Ok(container)
    }

    pub async fn get_container(&self, id: &str) -> Result<Container> {
        Ok(self.records.get(id).await?)
    }

    pub async fn list_containers(&self, state: Option<ContainerState>) -> Result<Vec<Container>> {
        let mut containers: Vec<Container> = self.records.list().await?;
        if let Some(state) = state {
            containers.retain(|c| c.state == state);
        }
        containers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(containers)
    }

    /// Record-only change of state and timestamps.
    pub async fn update_container(&self, id: &str, update: ContainerUpdate) -> Result<Container> {
        let mut container: Container = self.records.get(id).await?;
        container.apply_update(update)?;
        self.records.update(&container).await?;
        Ok(container)
    }

    pub async fn delete_container(&self, id: &str) -> Result<()> {
        let container: Container = self.records.get(id).await?;
        if let Some(service_id) = &container.service_id {
            log::warn!(
                "Deleting replica {} of service {}; reconciliation will replace it",
                container.name,
                service_id
            );
        }
        self.remove_replica(&container.id).await
    }

    pub async fn start_container(&self, id: &str) -> Result<Container> {
        let mut container: Container = self.records.get(id).await?;
        self.runtime.start(&container.id).await?;
        container.revive(Utc::now());
        self.records.update(&container).await?;
        log::info!("Container {} started", container.id);
        Ok(container)
    }

    pub async fn stop_container(&self, id: &str) -> Result<Container> {
        let mut container: Container = self.records.get(id).await?;
        self.runtime.stop(&container.id).await?;
        container.mark_succeeded(Utc::now());
        self.records.update(&container).await?;
        log::info!("Container {} stopped successfully", container.id);
        Ok(container)
    }

    pub async fn container_logs(&self, id: &str) -> Result<String> {
        let container: Container = self.records.get(id).await?;
        Ok(self.runtime.logs(&container.id).await?)
    }

    pub async fn container_health(&self, id: &str) -> Result<HealthState> {
        let container: Container = self.records.get(id).await?;
        Ok(container.health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PodiumError;
    use crate::service::testing::harness;

    fn cache_spec() -> ContainerSpec {
        serde_json::from_value(serde_json::json!({
            "name": "cache",
            "image": "redis:7",
            "restartPolicy": "Always",
        }))
        .expect("Failed to build container spec")
    }

    #[tokio::test]
    async fn test_create_then_start_and_stop() {
        let h = harness();
        let created = h
            .manager
            .create_container(cache_spec())
            .await
            .expect("create");
        assert_eq!(created.state, ContainerState::Pending);
        assert_eq!(created.node_id, "local");

        let started = h.manager.start_container(&created.id).await.expect("start");
        assert_eq!(started.state, ContainerState::Running);
        assert!(started.started_at.is_some());
        assert_eq!(
            h.runtime.get(&created.id).await.expect("live").state,
            ContainerState::Running
        );

        let stopped = h.manager.stop_container(&created.id).await.expect("stop");
        assert_eq!(stopped.state, ContainerState::Succeeded);
        assert!(stopped.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_start_clears_restart_limit() {
        let h = harness();
        let created = h
            .manager
            .create_container(cache_spec())
            .await
            .expect("create");
        let mut record = h.manager.start_container(&created.id).await.expect("start");
        record.restart_count = 5;
        record.mark_failed(Utc::now());
        h.records.update(&record).await.expect("update");

        let revived = h.manager.start_container(&created.id).await.expect("start");
        assert_eq!(revived.restart_count, 0);
        assert_eq!(revived.state, ContainerState::Running);
    }

    #[tokio::test]
    async fn test_update_rejects_illegal_transition() {
        let h = harness();
        let created = h
            .manager
            .create_container(cache_spec())
            .await
            .expect("create");
        let err = h
            .manager
            .update_container(
                &created.id,
                ContainerUpdate {
                    state: ContainerState::Succeeded,
                    started_at: None,
                    finished_at: None,
                },
            )
            .await
            .expect_err("pending cannot succeed");
        assert!(matches!(err, PodiumError::Validation(_)));

        let updated = h
            .manager
            .update_container(
                &created.id,
                ContainerUpdate {
                    state: ContainerState::Running,
                    started_at: Some(Utc::now()),
                    finished_at: None,
                },
            )
            .await
            .expect("legal transition");
        assert_eq!(updated.state, ContainerState::Running);
    }

    #[tokio::test]
    async fn test_list_filters_by_state() {
        let h = harness();
        let a = h
            .manager
            .create_container(cache_spec())
            .await
            .expect("create");
        h.manager
            .create_container(cache_spec())
            .await
            .expect("create");
        h.manager.start_container(&a.id).await.expect("start");

        assert_eq!(h.manager.list_containers(None).await.expect("list").len(), 2);
        let running = h
            .manager
            .list_containers(Some(ContainerState::Running))
            .await
            .expect("list");
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a.id);
    }

    #[tokio::test]
    async fn test_delete_removes_runtime_and_record() {
        let h = harness();
        let created = h
            .manager
            .create_container(cache_spec())
            .await
            .expect("create");
        h.manager.delete_container(&created.id).await.expect("delete");
        assert_eq!(h.runtime.len().await, 0);
        assert!(h.manager.get_container(&created.id).await.is_err());
        assert!(h
            .manager
            .delete_container(&created.id)
            .await
            .expect_err("gone")
            .is_client_error());
    }

    #[tokio::test]
    async fn test_logs_and_health_of_unknown_container_are_not_found() {
        let h = harness();
        assert!(h
            .manager
            .container_logs("nope")
            .await
            .expect_err("missing")
            .is_client_error());
        assert!(h
            .manager
            .container_health("nope")
            .await
            .expect_err("missing")
            .is_client_error());

        let created = h
            .manager
            .create_container(cache_spec())
            .await
            .expect("create");
        let logs = h.manager.container_logs(&created.id).await.expect("logs");
        assert!(logs.contains("cache"));
        let health = h.manager.container_health(&created.id).await.expect("health");
        assert_eq!(health, HealthState::default());
    }

    #[tokio::test]
    async fn test_invalid_spec_touches_nothing() {
        let h = harness();
        let mut spec = cache_spec();
        spec.image = " ".to_string();
        assert!(h.manager.create_container(spec).await.is_err());
        assert_eq!(h.runtime.len().await, 0);
    }
}
