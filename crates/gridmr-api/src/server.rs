use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use gridmr_core::client::{HttpTransport, SchedulerClient};
use gridmr_core::protocol::RegisterWorkerRequest;
use gridmr_core::worker::{run_heartbeat_loop, TaskExecutor};
use gridmr_core::{Config, Error, LocalBlobStore, Result, Scheduler};

use crate::routes;
use crate::state::{SchedulerAppState, WorkerAppState};

/// Run the scheduler process: state machine, background loops and the HTTP
/// surface for clients and workers
pub async fn run_scheduler(config: Config) -> Result<()> {
    let addr = bind_addr(&config.server.host, config.server.port)?;

    let store = Arc::new(LocalBlobStore::new(config.blobstore.root.clone())?);
    let transport = Arc::new(HttpTransport::new());
    let scheduler = Arc::new(Scheduler::new(store, transport, &config));

    let _loops = scheduler.clone().start();

    let app = build_scheduler_router(SchedulerAppState::new(scheduler));

    info!("gridmr scheduler listening on http://{}", addr);
    log_scheduler_routes();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(())
}

/// Run a worker process: executor, registration, heartbeat loop and the
/// task surface the scheduler dispatches to
pub async fn run_worker(config: Config) -> Result<()> {
    let addr = bind_addr(&config.worker.host, config.worker.port)?;

    let endpoint = config
        .worker
        .advertise_endpoint
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", config.worker.host, config.worker.port));

    let store = Arc::new(LocalBlobStore::new(config.blobstore.root.clone())?);
    let executor = Arc::new(TaskExecutor::new(store, config.worker.clone()));
    let client = Arc::new(SchedulerClient::new(config.worker.scheduler_url.clone()));

    let registration = RegisterWorkerRequest {
        endpoint: endpoint.clone(),
        capacity: config.worker.capacity,
    };
    let worker_id = register_with_retry(&client, &registration).await?;
    info!(
        "Registered with scheduler: worker_id={}, endpoint={}",
        worker_id, endpoint
    );

    let worker_id = Arc::new(RwLock::new(worker_id));
    tokio::spawn(run_heartbeat_loop(
        (*client).clone(),
        executor.clone(),
        registration,
        worker_id.clone(),
        config.worker.heartbeat_interval(),
    ));

    let app = build_worker_router(WorkerAppState::new(executor, client, worker_id));

    info!("gridmr worker listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(())
}

fn bind_addr(host: &str, port: u16) -> Result<SocketAddr> {
    Ok(SocketAddr::from((
        host.parse::<std::net::IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid host: {}", e)))?,
        port,
    )))
}

/// A worker usually starts alongside the scheduler; keep trying for a while
/// before giving up
async fn register_with_retry(
    client: &SchedulerClient,
    registration: &RegisterWorkerRequest,
) -> Result<gridmr_core::scheduler::WorkerId> {
    let mut last_error = None;

    for attempt in 0..30 {
        match client.register_worker(registration).await {
            Ok(worker_id) => return Ok(worker_id),
            Err(e) => {
                warn!("Registration attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::network("scheduler unreachable")))
}

/// Build the scheduler router
fn build_scheduler_router(state: SchedulerAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .route("/api/v1/jobs", post(routes::jobs::submit_job))
        .route("/api/v1/jobs/:id", get(routes::jobs::job_status))
        .route("/api/v1/results", get(routes::jobs::results))
        .route("/api/v1/blobs", post(routes::blobs::upload_blob))
        .route("/api/v1/workers/register", post(routes::workers::register))
        .route("/api/v1/workers/heartbeat", post(routes::workers::heartbeat))
        .route(
            "/api/v1/workers/completions",
            post(routes::workers::task_completed),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the worker router
fn build_worker_router(state: WorkerAppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/tasks/map", post(routes::tasks::execute_map))
        .route("/api/v1/tasks/reduce", post(routes::tasks::execute_reduce))
        .route("/api/v1/tasks/cancel", post(routes::tasks::cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Log available routes
fn log_scheduler_routes() {
    info!("Available routes:");
    info!("  GET  /health                      - Health check");
    info!("  POST /api/v1/jobs                 - Submit job");
    info!("  GET  /api/v1/jobs/:id             - Job status");
    info!("  GET  /api/v1/results              - Read committed outputs");
    info!("  POST /api/v1/blobs                - Upload blob");
    info!("  POST /api/v1/workers/register     - Register worker");
    info!("  POST /api/v1/workers/heartbeat    - Worker heartbeat");
    info!("  POST /api/v1/workers/completions  - Attempt completion");
}

async fn health_check() -> &'static str {
    "OK"
}

async fn root() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "gridmr scheduler",
        "version": gridmr_core::VERSION,
        "status": "operational",
    }))
}
