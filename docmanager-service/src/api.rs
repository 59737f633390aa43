//! HTTP API for the document manager.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Document upload and management (`/api/v1/document`)
//! - Tag management (`/api/v1/tag`)
//! - Retrieval-augmented answers (`/api/v1/rag`)
//! - Presigned object downloads (`/objects`)

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::DocManagerService;

pub mod documents;
pub mod objects;
pub mod rag;
pub mod tags;

/// Room for multipart boundaries and the small text fields next to the file
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state
pub struct AppState {
    pub service: Arc<DocManagerService>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(service: Arc<DocManagerService>, metrics: Option<PrometheusHandle>) -> Router {
    let max_body_size =
        service.config.limits.max_document_size_bytes as usize + MULTIPART_OVERHEAD_BYTES;

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let document_routes = Router::new()
        .route(
            "/documents",
            get(documents::list_documents_handler).post(documents::upload_document_handler),
        )
        .route("/documents/search", post(documents::search_documents_handler))
        .route(
            "/documents/{id}",
            get(documents::get_document_handler)
                .patch(documents::update_document_handler)
                .delete(documents::delete_document_handler),
        )
        .route("/documents/{id}/view", get(documents::view_document_handler))
        .route(
            "/documents/{id}/summarize",
            get(documents::summarize_document_handler),
        )
        .route(
            "/documents/{id}/summaries",
            get(documents::list_summaries_handler),
        )
        .route(
            "/documents/{id}/tags/{tag_id}",
            post(documents::associate_tag_handler).delete(documents::unassociate_tag_handler),
        )
        .route(
            "/tags/{tag_id}/documents",
            get(documents::list_tag_documents_handler),
        )
        .layer(DefaultBodyLimit::max(max_body_size));

    let tag_routes = Router::new()
        .route(
            "/tags",
            get(tags::list_tags_handler).post(tags::create_tag_handler),
        )
        .route(
            "/tags/{id}",
            get(tags::get_tag_handler)
                .patch(tags::update_tag_handler)
                .delete(tags::delete_tag_handler),
        )
        .route(
            "/documents/{id}/tags",
            get(tags::list_document_tags_handler),
        );

    let rag_routes = Router::new().route("/query", post(rag::query_handler));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/objects/{*key}", get(objects::get_object_handler))
        .nest("/api/v1/document", document_routes)
        .nest("/api/v1/tag", tag_routes)
        .nest("/api/v1/rag", rag_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Root, Health & Metrics ===

#[derive(Serialize)]
struct WelcomeResponse {
    message: &'static str,
}

async fn root_handler() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the Document Manager API!",
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let model_available = state.service.generator.is_available().await;

    let status = if model_available {
        "healthy".to_string()
    } else {
        "degraded: model backend unavailable".to_string()
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        model_available,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    model_available: bool,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::service::tests::{TestHarness, harness};

    pub(crate) fn app(h: &TestHarness) -> Router {
        router(h.service.clone(), None)
    }

    /// Send a request and decode the JSON reply
    pub(crate) async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub(crate) fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub(crate) fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_welcome() {
        let h = harness();
        let (status, body) = send(app(&h), empty_request("GET", "/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Welcome to the Document Manager API!");
    }

    #[tokio::test]
    async fn test_health_reports_model() {
        let h = harness();
        let (status, body) = send(app(&h), empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_available"], true);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let h = harness();
        let response = app(&h)
            .oneshot(empty_request("GET", "/metrics"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
