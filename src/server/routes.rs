//! HTTP and WebSocket routes

use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::OwnedSemaphorePermit;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use super::ws::{self, WsTransport};
use crate::broadcast::Subscription;
use crate::error::{Error, Result};
use crate::occupancy::{OccupancySummary, ZoneState};
use crate::registry::DebugStreams;
use crate::session::{SessionConfig, SessionMode, StreamQuery, StreamSession};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/debug/streams", get(debug_streams))
        .route("/api/occupancy/:camera_id", get(camera_occupancy))
        .route("/ws/stream/:camera_id/raw", get(raw_stream))
        .route("/ws/stream/:camera_id/detect", get(detect_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "broadcasters": state.manager.broadcaster_count().await,
        "detector": state.manager.has_detector(),
        "sessions": state.stats.snapshot(),
    }))
}

async fn debug_streams(State(state): State<AppState>) -> Json<DebugStreams> {
    Json(state.manager.streams().await)
}

#[derive(Debug, Serialize)]
struct OccupancyResponse {
    camera_id: String,
    #[serde(flatten)]
    summary: OccupancySummary,
    zones: Vec<ZoneState>,
}

async fn camera_occupancy(
    Path(camera_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<OccupancyResponse>> {
    if !state.store.has_camera(&camera_id).await {
        return Err(Error::NotFound(format!("no zones for camera '{}'", camera_id)));
    }
    Ok(Json(OccupancyResponse {
        summary: state.store.summary(&camera_id).await,
        zones: state.store.occupancy(&camera_id).await,
        camera_id,
    }))
}

async fn raw_stream(
    Path(camera_id): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    open_stream(ws, state, camera_id, SessionMode::Raw, query).await
}

/// Annotated stream
///
/// `labels=true` adds a confidence tab above each box. Class names and
/// confidences are sent as text in each frame's `detections` array.
async fn detect_stream(
    Path(camera_id): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    open_stream(ws, state, camera_id, SessionMode::Detect, query).await
}

/// Validate and subscribe before upgrading, so rejections are plain HTTP errors
async fn open_stream(
    ws: WebSocketUpgrade,
    state: AppState,
    camera_id: String,
    mode: SessionMode,
    query: StreamQuery,
) -> Result<Response> {
    let config = SessionConfig::from_query(mode, &query, &state.config.session)?;
    let key = config.stream_key(state.camera_uri(&camera_id)?);
    let permit = state.acquire_session()?;
    let subscription = state.manager.subscribe(&key).await?;
    let session_id = state.next_session_id();

    tracing::debug!(
        session_id,
        camera = %camera_id,
        stream = %key,
        "Viewer accepted"
    );

    Ok(ws.on_upgrade(move |socket| {
        serve_session(socket, state, session_id, config, subscription, permit)
    }))
}

async fn serve_session(
    socket: WebSocket,
    state: AppState,
    session_id: u64,
    config: SessionConfig,
    subscription: Subscription,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let (sink, stream) = socket.split();
    state.stats.session_opened();

    let summary = StreamSession::new(session_id, config, subscription)
        .run(WsTransport::new(sink), ws::closed(stream))
        .await;

    state.stats.session_closed(summary.bytes_sent);
}
