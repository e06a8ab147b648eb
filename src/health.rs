//! Health check and metrics endpoint

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub uptime_seconds: u64,
    pub bot_username: Option<String>,
}

/// Metrics data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub jobs_delivered: u64,
    pub jobs_failed: u64,
    pub jobs_rejected: u64,
    pub grants_applied: u64,
    pub broadcasts_dispatched: u64,
    pub errors: u64,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<RwLock<Metrics>>,
    pub start_time: SystemTime,
    pub bot_username: Option<String>,
}

impl AppState {
    pub fn new(bot_username: Option<String>) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(Metrics::default())),
            start_time: SystemTime::now(),
            bot_username,
        }
    }

    pub async fn increment_jobs_delivered(&self) {
        self.metrics.write().await.jobs_delivered += 1;
    }

    pub async fn increment_jobs_failed(&self) {
        self.metrics.write().await.jobs_failed += 1;
    }

    pub async fn increment_jobs_rejected(&self) {
        self.metrics.write().await.jobs_rejected += 1;
    }

    pub async fn increment_grants_applied(&self) {
        self.metrics.write().await.grants_applied += 1;
    }

    pub async fn increment_broadcasts_dispatched(&self) {
        self.metrics.write().await.broadcasts_dispatched += 1;
    }

    pub async fn increment_errors(&self) {
        self.metrics.write().await.errors += 1;
    }
}

/// Health check endpoint handler
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let uptime = state.start_time.elapsed().unwrap_or_default().as_secs();

    (
        StatusCode::OK,
        Json(HealthStatus {
            status: "healthy".to_string(),
            uptime_seconds: uptime,
            bot_username: state.bot_username.clone(),
        }),
    )
}

/// Metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> Json<Metrics> {
    let metrics = state.metrics.read().await;
    Json(metrics.clone())
}

/// Liveness check (process is alive)
async fn live_handler() -> StatusCode {
    StatusCode::OK
}

/// Create health check router
pub fn create_health_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/live", get(live_handler))
        .with_state(state)
}

/// Start health check server
pub async fn start_health_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_health_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Health check server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
