use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::{body, error_response, paginate, AppState, ListQuery, Page};
use crate::error::PodiumError;
use crate::models::{Service, ServiceSpec, ServiceState};
use crate::service::{DeleteReport, ReconcileSummary, ServiceStatus, TriggerOutcome};

#[derive(Debug, Deserialize)]
pub(super) struct ScaleRequest {
    replicas: u32,
}

pub(super) async fn create_service(
    State(state): State<AppState>,
    payload: Result<Json<ServiceSpec>, JsonRejection>,
) -> Result<(StatusCode, Json<Service>), PodiumError> {
    let spec = body(payload)?;
    let service = state.manager.create_service(spec).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub(super) async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Service>>, PodiumError> {
    let filter = query.state::<ServiceState>()?;
    let services = state.manager.list_services(filter).await?;
    Ok(Json(paginate(services, &query)))
}

pub(super) async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Service>, PodiumError> {
    Ok(Json(state.manager.get_service(&id).await?))
}

pub(super) async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ServiceSpec>, JsonRejection>,
) -> Result<Json<Service>, PodiumError> {
    let spec = body(payload)?;
    Ok(Json(state.manager.update_service(&id, spec).await?))
}

pub(super) async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteReport>, PodiumError> {
    Ok(Json(state.manager.delete_service(&id).await?))
}

pub(super) async fn scale_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ScaleRequest>, JsonRejection>,
) -> Result<Json<Service>, PodiumError> {
    let request = body(payload)?;
    Ok(Json(
        state.manager.scale_service(&id, request.replicas).await?,
    ))
}

pub(super) async fn service_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceStatus>, PodiumError> {
    Ok(Json(state.manager.get_service_status(&id).await?))
}

/// Runs a pass now, unless one is already in flight.
pub(super) async fn reconcile(State(state): State<AppState>) -> Response {
    match state.reconciler.run_once().await {
        TriggerOutcome::Completed(summary) => Json::<ReconcileSummary>(summary).into_response(),
        TriggerOutcome::AlreadyRunning => {
            error_response(StatusCode::CONFLICT, "reconciliation already in progress")
        }
        TriggerOutcome::TimedOut(deadline) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            format!("reconciliation exceeded its {deadline:?} deadline"),
        ),
        TriggerOutcome::Failed(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{app, call};
    use axum::http::StatusCode;
    use serde_json::json;

    async fn create_web(app: &axum::Router) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/services",
            Some(json!({"name": "web", "image": "nginx", "replicas": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().expect("id").to_string()
    }

    #[tokio::test]
    async fn test_create_and_get_service() {
        let (app, h) = app();
        let id = create_web(&app).await;

        let (status, body) = call(&app, "GET", &format!("/services/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "running");
        assert_eq!(body["containerIds"].as_array().expect("ids").len(), 3);
        assert_eq!(h.runtime.names().await, vec!["web-0", "web-1", "web-2"]);
    }

    #[tokio::test]
    async fn test_invalid_service_is_400_with_error_body() {
        let (app, h) = app();
        let (status, body) = call(
            &app,
            "POST",
            "/services",
            Some(json!({"name": "", "image": "nginx"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("name"));
        assert_eq!(h.runtime.len().await, 0);

        let (status, body) = call(&app, "POST", "/services", Some(json!({"replicas": 2}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_scale_and_status() {
        let (app, _) = app();
        let id = create_web(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            &format!("/services/{id}/scale"),
            Some(json!({"replicas": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["replicas"], 1);

        let (status, body) = call(&app, "GET", &format!("/services/{id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["desiredReplicas"], 1);
        assert_eq!(body["currentReplicas"], 1);
        assert_eq!(body["replicas"][0]["name"], "web-0");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (app, h) = app();
        let id = create_web(&app).await;

        let (status, body) = call(
            &app,
            "PUT",
            &format!("/services/{id}"),
            Some(json!({"name": "web", "image": "nginx:1.27", "replicas": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["image"], "nginx:1.27");
        assert_eq!(h.runtime.len().await, 2);

        let (status, body) = call(&app, "DELETE", &format!("/services/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["failed"], 0);
        assert_eq!(h.runtime.len().await, 0);

        let (status, body) = call(&app, "GET", &format!("/services/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_list_services_with_filter_and_paging() {
        let (app, _) = app();
        for name in ["a", "b", "c"] {
            let (status, _) = call(
                &app,
                "POST",
                "/services",
                Some(json!({"name": name, "image": "nginx"})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = call(&app, "GET", "/services?limit=2&offset=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalCount"], 3);
        assert_eq!(body["items"].as_array().expect("items").len(), 2);
        assert_eq!(body["items"][0]["name"], "b");

        let (_, body) = call(&app, "GET", "/services?state=failed", None).await;
        assert_eq!(body["totalCount"], 0);

        let (status, _) = call(&app, "GET", "/services?state=sleeping", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_on_demand_reconcile() {
        let (app, h) = app();
        let id = create_web(&app).await;
        let service = h.manager.get_service(&id).await.expect("service");
        h.runtime.vanish(&service.container_ids[2]).await;

        let (status, body) = call(&app, "POST", "/reconcile", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], 1);
        assert_eq!(h.runtime.len().await, 3);
    }
}
