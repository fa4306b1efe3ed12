//! HTTP surface. Handlers only translate between JSON and
//! [`ServiceManager`] calls; no orchestration happens here.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::PodiumError;
use crate::runtime::RuntimeError;
use crate::service::{Reconciler, ServiceManager};

mod containers;
mod services;

const DEFAULT_PAGE_LIMIT: usize = 100;

/// State shared across axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ServiceManager>,
    pub reconciler: Arc<Reconciler>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

impl PodiumError {
    fn status_code(&self) -> StatusCode {
        match self {
            PodiumError::Validation(_) => StatusCode::BAD_REQUEST,
            PodiumError::NotFound { .. } => StatusCode::NOT_FOUND,
            PodiumError::PolicyLimit { .. } => StatusCode::CONFLICT,
            PodiumError::Runtime(RuntimeError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            PodiumError::Runtime(_) | PodiumError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PodiumError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        } else {
            log::debug!("Request rejected: {}", self);
        }
        error_response(status, self.to_string())
    }
}

/// Unwraps a JSON body, turning decode failures into validation errors so
/// they share the `{"error": ...}` shape.
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, PodiumError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| PodiumError::validation(rejection.body_text()))
}

/// `?state=&limit=&offset=` on list endpoints. Malformed numbers fall back
/// to the defaults.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    pub state: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListQuery {
    /// Parses the state filter with the same spelling as the JSON records.
    pub(crate) fn state<S: serde::de::DeserializeOwned>(&self) -> Result<Option<S>, PodiumError> {
        match self.state.as_deref().filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_string()))
                .map(Some)
                .map_err(|_| PodiumError::validation(format!("unknown state {raw:?}"))),
        }
    }

    fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|l| l.parse::<usize>().ok())
            .filter(|l| *l >= 1)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
    }

    fn offset(&self) -> usize {
        self.offset
            .as_deref()
            .and_then(|o| o.parse::<usize>().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

pub(crate) fn paginate<T>(items: Vec<T>, query: &ListQuery) -> Page<T> {
    let total_count = items.len();
    let limit = query.limit();
    let offset = query.offset();
    let items = items.into_iter().skip(offset).take(limit).collect();
    Page {
        items,
        total_count,
        limit,
        offset,
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "name": "podium" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/services",
            post(services::create_service).get(services::list_services),
        )
        .route(
            "/services/{id}",
            get(services::get_service)
                .put(services::update_service)
                .delete(services::delete_service),
        )
        .route("/services/{id}/scale", post(services::scale_service))
        .route("/services/{id}/status", get(services::service_status))
        .route("/reconcile", post(services::reconcile))
        .route(
            "/containers",
            post(containers::create_container).get(containers::list_containers),
        )
        .route(
            "/containers/{id}",
            get(containers::get_container)
                .put(containers::update_container)
                .delete(containers::delete_container),
        )
        .route("/containers/{id}/start", post(containers::start_container))
        .route("/containers/{id}/stop", post(containers::stop_container))
        .route("/containers/{id}/logs", get(containers::container_logs))
        .route("/containers/{id}/health", get(containers::container_health))
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Starting API server on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
