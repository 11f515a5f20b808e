//! HTTP boundary: optimization event stream and run administration

use crate::gepa::{ChannelSink, OptimizeError, OptimizeRequest, Optimizer, ProgressEvent};
use crate::storage::{RunLog, RunStore};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct AppState {
    pub optimizer: Arc<Optimizer>,
    pub runs: Arc<dyn RunStore>,
    /// Ceiling for a whole optimization run
    pub run_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl From<OptimizeError> for ApiError {
    fn from(e: OptimizeError) -> Self {
        match e {
            OptimizeError::InvalidRequest(msg) => ApiError::InvalidInput(msg),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct DeleteParams {
    id: Option<String>,
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    deleted: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/optimize", post(optimize))
        .route("/api/runs", get(list_runs).delete(delete_run))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_runs(State(state): State<Arc<AppState>>) -> Json<RunLog> {
    Json(RunLog {
        runs: state.runs.list().await,
    })
}

async fn delete_run(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("Run ID required".to_string()))?;
    let deleted = state.runs.delete(&id).await?;
    info!("Deleted run {}: {}", id, deleted);
    Ok(Json(DeleteResponse {
        success: true,
        deleted,
    }))
}

/// Start a run and stream its progress events
async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OptimizeRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>> + Send>, ApiError> {
    request.validate()?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<ProgressEvent>(32);
    info!("Starting optimization run {}", run_id);
    tokio::spawn(drive_run(state, run_id, request, tx));

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Drive the run until it ends, the client goes away or the run times out.
/// The last two abandon the run and mark it as errored.
async fn drive_run(
    state: Arc<AppState>,
    run_id: String,
    request: OptimizeRequest,
    tx: mpsc::Sender<ProgressEvent>,
) {
    let sink = ChannelSink::new(tx.clone());
    tokio::select! {
        result = state.optimizer.run_streaming(&run_id, request, &sink) => {
            if let Ok(run) = result {
                info!("Run {} finished with best score {:.2}", run.id, run.best_score);
            }
        }
        _ = tx.closed() => {
            warn!("Client disconnected, abandoning run {}", run_id);
            state.optimizer.fail(&run_id, "Client disconnected", &sink).await;
        }
        _ = tokio::time::sleep(state.run_timeout) => {
            warn!("Run {} exceeded {:?}, abandoning", run_id, state.run_timeout);
            state.optimizer.fail(&run_id, "Optimization timed out", &sink).await;
        }
    }
}

fn sse_event(event: &ProgressEvent) -> SseEvent {
    match serde_json::to_string(event) {
        Ok(data) => SseEvent::default().event(event.kind.as_str()).data(data),
        Err(e) => SseEvent::default()
            .event("error")
            .data(format!("sse serialization failed: {e}")),
    }
}
