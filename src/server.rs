//! @ai:module:intent HTTP surface for starting, streaming and inspecting runs
//! @ai:module:layer presentation
//! @ai:module:public_api router, serve
//! @ai:module:stateless false

use crate::benchmark::BenchmarkRequest;
use crate::coordinator::{ChannelSink, Coordinator, ExecutionMode};
use crate::error::{BenchError, Result};
use crate::provider::client::ProviderClient;
use crate::store::Store;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State as AxumState},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Events buffered between the run task and a slow HTTP reader
const EVENT_BUFFER: usize = 256;

/// Shared state for the HTTP server.
pub struct ServerState<P: ProviderClient, S: Store> {
    pub coordinator: Coordinator<P, S>,
}

/// @ai:intent Build the application router around a coordinator
pub fn router<P: ProviderClient, S: Store>(coordinator: Coordinator<P, S>) -> Router {
    let state = Arc::new(ServerState { coordinator });

    Router::new()
        .route("/api/execute", post(execute::<P, S>))
        .route("/api/execute/stream", post(execute_stream::<P, S>))
        .route("/api/runs/{run_id}", get(run_details::<P, S>))
        .route("/health", get(health))
        .with_state(state)
}

/// @ai:intent Serve the API until ctrl-c
/// @ai:effects network
pub async fn serve<P: ProviderClient, S: Store>(
    coordinator: Coordinator<P, S>,
    bind: &str,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Benchmark server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Benchmark server shutting down");
        })
        .await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "modelbench" }))
}

/// POST /api/execute: accept a run and process it in the background.
async fn execute<P: ProviderClient, S: Store>(
    AxumState(state): AxumState<Arc<ServerState<P, S>>>,
    body: Bytes,
) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    match state.coordinator.start_run(request) {
        Ok(handle) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "runId": handle.run_id,
                "message": "Benchmark started",
                "responseIds": handle.response_ids,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/execute/stream: run and relay every event as SSE.
async fn execute_stream<P: ProviderClient, S: Store>(
    AxumState(state): AxumState<Arc<ServerState<P, S>>>,
    body: Bytes,
) -> Response {
    let prepared = match parse_request(&body).and_then(|r| state.coordinator.prepare(r)) {
        Ok(prepared) => prepared,
        Err(e) => return error_response(&e),
    };

    let (sink, rx) = ChannelSink::new(EVENT_BUFFER);
    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        coordinator
            .execute(prepared, &sink, ExecutionMode::Streaming)
            .await;
    });

    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let frame = event.to_sse_frame().unwrap_or_else(|e| {
            warn!("Could not serialize {} event: {}", event.name(), e);
            String::new()
        });
        Some((Ok::<_, Infallible>(Bytes::from(frame)), rx))
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

/// GET /api/runs/{run_id}: the run and its responses in creation order.
async fn run_details<P: ProviderClient, S: Store>(
    AxumState(state): AxumState<Arc<ServerState<P, S>>>,
    Path(run_id): Path<String>,
) -> Response {
    match state.coordinator.load_run(&run_id) {
        Ok((run, responses)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "run": run, "responses": responses })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

fn parse_request(body: &[u8]) -> Result<BenchmarkRequest> {
    serde_json::from_slice(body)
        .map_err(|e| BenchError::InvalidConfig(format!("malformed request body: {}", e)))
}

fn error_response(err: &BenchError) -> Response {
    let status = match err {
        _ if err.is_setup_error() => StatusCode::BAD_REQUEST,
        BenchError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => {
            error!("Request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}
