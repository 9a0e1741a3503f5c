//! HTTP API for heartbeat metrics and health checks

use crate::config::ExporterConfig;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use exporter_lib::{
    directory::DirectoryClientFactory,
    health::{components, ComponentStatus, HealthRegistry},
    Reconciler, ScrapeContext, StructuredLogger, TargetList,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Builds the directory client factory for a loaded configuration
pub type FactoryBuilder =
    Box<dyn Fn(&ExporterConfig) -> anyhow::Result<Arc<dyn DirectoryClientFactory>> + Send + Sync>;

/// Everything one reconciliation pass needs from the configuration
#[derive(Clone)]
pub struct ScrapePlan {
    pub targets: TargetList,
    pub factory: Arc<dyn DirectoryClientFactory>,
    pub max_concurrency: usize,
}

impl ScrapePlan {
    pub fn from_config(
        config: &ExporterConfig,
        build_factory: &FactoryBuilder,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            targets: config.targets(),
            factory: build_factory(config)?,
            max_concurrency: config.global.max_concurrency,
        })
    }
}

/// Shared application state
///
/// The configuration file is read again on every scrape. When that fails
/// the last plan that loaded cleanly keeps serving.
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub logger: StructuredLogger,
    config_path: PathBuf,
    build_factory: FactoryBuilder,
    last_good: RwLock<ScrapePlan>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        logger: StructuredLogger,
        config_path: PathBuf,
        initial: ScrapePlan,
        build_factory: FactoryBuilder,
    ) -> Self {
        Self {
            health_registry,
            logger,
            config_path,
            build_factory,
            last_good: RwLock::new(initial),
        }
    }

    /// Reload the configuration, falling back to the last good plan
    async fn current_plan(&self) -> ScrapePlan {
        let reloaded = ExporterConfig::load(&self.config_path)
            .map_err(anyhow::Error::from)
            .and_then(|config| ScrapePlan::from_config(&config, &self.build_factory));

        match reloaded {
            Ok(plan) => {
                *self.last_good.write().await = plan.clone();
                self.health_registry.set_healthy(components::CONFIG).await;
                plan
            }
            Err(e) => {
                warn!(
                    config = %self.config_path.display(),
                    error = %format!("{e:#}"),
                    "Configuration reload failed, using last good configuration"
                );
                self.health_registry
                    .set_unhealthy(components::CONFIG, format!("reload failed: {e:#}"))
                    .await;
                self.last_good.read().await.clone()
            }
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving scrapes
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint, one full reconciliation pass per request
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let ctx = match ScrapeContext::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "Failed to build scrape registry");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let plan = state.current_plan().await;
    let reconciler = Reconciler::new(plan.factory, plan.max_concurrency, state.logger.clone());
    let summary = reconciler.reconcile(&plan.targets, ctx.sink()).await;
    state.health_registry.record_pass(&summary).await;

    match ctx.render() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, ctx.content_type())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server, returning once `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
