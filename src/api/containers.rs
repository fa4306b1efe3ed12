use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use super::{body, paginate, AppState, ListQuery, Page};
use crate::error::PodiumError;
use crate::models::{Container, ContainerSpec, ContainerState, ContainerUpdate, HealthState};

#[derive(Debug, Serialize)]
pub(super) struct LogsResponse {
    logs: String,
}

pub(super) async fn create_container(
    State(state): State<AppState>,
    payload: Result<Json<ContainerSpec>, JsonRejection>,
) -> Result<(StatusCode, Json<Container>), PodiumError> {
    let spec = body(payload)?;
    let container = state.manager.create_container(spec).await?;
    Ok((StatusCode::CREATED, Json(container)))
}

pub(super) async fn list_containers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Container>>, PodiumError> {
    let filter = query.state::<ContainerState>()?;
    let containers = state.manager.list_containers(filter).await?;
    Ok(Json(paginate(containers, &query)))
}

pub(super) async fn get_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Container>, PodiumError> {
    Ok(Json(state.manager.get_container(&id).await?))
}

pub(super) async fn update_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ContainerUpdate>, JsonRejection>,
) -> Result<Json<Container>, PodiumError> {
    let update = body(payload)?;
    Ok(Json(state.manager.update_container(&id, update).await?))
}

pub(super) async fn delete_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, PodiumError> {
    state.manager.delete_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Container>, PodiumError> {
    Ok(Json(state.manager.start_container(&id).await?))
}

pub(super) async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Container>, PodiumError> {
    Ok(Json(state.manager.stop_container(&id).await?))
}

pub(super) async fn container_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LogsResponse>, PodiumError> {
    let logs = state.manager.container_logs(&id).await?;
    Ok(Json(LogsResponse { logs }))
}

pub(super) async fn container_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HealthState>, PodiumError> {
    Ok(Json(state.manager.container_health(&id).await?))
}
