//! Kernel HTTP bridge
//!
//! Axum server exposing the orchestrator, with CORS, request tracing and
//! graceful shutdown.
//!
//! - `POST /api/kernel` `{ "task": "..." }` → kernel response
//! - `GET /api/kernel` → status and version
//! - `GET /api/patterns?limit=n` → recent patterns
//! - `GET /api/capabilities` → registry snapshot
//! - `GET /api/health` → liveness with uptime

use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::orchestrator::{Orchestrator, TaskRequest};

/// State shared across handlers
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[derive(Debug, Deserialize)]
pub struct KernelRequest {
    #[serde(default)]
    pub task: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    capabilities: usize,
    patterns: Option<usize>,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct PatternQuery {
    pub limit: Option<usize>,
}

const DEFAULT_PATTERN_LIMIT: usize = 20;
const MAX_PATTERN_LIMIT: usize = 500;

async fn submit_task(State(state): State<Arc<AppState>>, Json(req): Json<KernelRequest>) -> impl IntoResponse {
    let response = state.orchestrator.handle(&TaskRequest::new(req.task.clone())).await;

    let status = if req.task.trim().is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, Json(response))
}

async fn kernel_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "Hive Kernel Online",
        version: state.version,
    })
}

async fn list_patterns(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PatternQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PATTERN_LIMIT)
        .clamp(1, MAX_PATTERN_LIMIT);
    Json(state.orchestrator.store().list_recent(limit))
}

async fn list_capabilities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.registry().snapshot())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.uptime_secs(),
        capabilities: state.orchestrator.registry().len(),
        patterns: state.orchestrator.store().count().ok(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Router with every kernel route and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/kernel", get(kernel_status).post(submit_task))
        .route("/api/patterns", get(list_patterns))
        .route("/api/capabilities", get(list_capabilities))
        .route("/api/health", get(health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl+C or SIGTERM
pub async fn serve(orchestrator: Orchestrator, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(Arc::new(AppState::new(orchestrator)));

    info!("Starting kernel bridge on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Kernel bridge shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::InvocationDispatcher;
    use crate::governor::PolicyGovernor;
    use crate::memory::{Pattern, PatternStore};
    use crate::registry::{CapabilityCategory, CapabilityDescriptor, CapabilityRegistry};
    use crate::router::IntentRouter;
    use crate::transport::BuiltinTransport;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let registry = Arc::new(
            CapabilityRegistry::from_table([CapabilityDescriptor::new(
                "cortex",
                CapabilityCategory::Builtin,
                "echo",
            )])
            .unwrap(),
        );
        let dispatcher = Arc::new(InvocationDispatcher::new(registry, Duration::from_secs(5)));
        dispatcher.bind("cortex", Arc::new(BuiltinTransport::echo()));

        let store = Arc::new(PatternStore::open_in_memory().unwrap());
        store.append(Pattern::new("Feedback loops", "music", "output feeds input", 0.9));

        Arc::new(AppState::new(Orchestrator::new(
            IntentRouter::default(),
            dispatcher,
            Arc::new(PolicyGovernor::with_constitution()),
            store,
        )))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_task(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/kernel")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_task() {
        let app = build_router(test_state());
        let response = app.oneshot(post_task(r#"{"task": "hello kernel"}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["content"], "hello kernel");
        assert_eq!(json["worker"], "cortex");
        assert!(json.get("chain").is_none());
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_submit_empty_task() {
        let app = build_router(test_state());
        let response = app.oneshot(post_task(r#"{"task": ""}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["worker"], "cortex");
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_kernel_status() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/kernel").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "Hive Kernel Online");
    }

    #[tokio::test]
    async fn test_list_patterns() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/patterns?limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "Feedback loops");
        assert_eq!(json[0]["sourceDomain"], "music");
    }

    #[tokio::test]
    async fn test_capabilities_and_health() {
        let state = test_state();

        let response = build_router(state.clone())
            .oneshot(Request::builder().uri("/api/capabilities").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json[0]["id"], "cortex");
        assert_eq!(json[0]["healthState"], "idle");

        let response = build_router(state)
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["capabilities"], 1);
        assert_eq!(json["patterns"], 1);
    }
}
