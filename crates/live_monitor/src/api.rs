//! HTTP and WebSocket API for live views.

use crate::error::MonitorError;
use crate::registry::MonitorRegistry;
use crate::state::LiveView;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MonitorRegistry>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/monitors", get(list_monitors_handler))
        .route(
            "/monitors/{event_id}",
            get(get_monitor_handler)
                .put(start_monitor_handler)
                .delete(stop_monitor_handler),
        )
        .route("/monitors/{event_id}/retry", post(retry_handler))
        .route("/monitors/{event_id}/refresh", post(refresh_handler))
        .route("/monitors/{event_id}/ws", get(ws_handler))
        .with_state(Arc::new(state))
        .layer(CorsLayer::permissive())
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    monitors: usize,
}

#[derive(Serialize)]
struct MonitorListResponse {
    events: Vec<String>,
    count: usize,
}

#[derive(Serialize)]
struct CommandResponse {
    status: String,
    event_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: MonitorError) -> ApiError {
    let status = match &err {
        MonitorError::InvalidEventId(_) => StatusCode::BAD_REQUEST,
        MonitorError::NotMonitored(_) => StatusCode::NOT_FOUND,
        MonitorError::SessionClosed(_) => StatusCode::GONE,
        MonitorError::Stream(_) => StatusCode::BAD_GATEWAY,
        MonitorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn not_monitored(event_id: &str) -> ApiError {
    api_error(MonitorError::NotMonitored(event_id.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        monitors: state.registry.len(),
    })
}

async fn list_monitors_handler(State(state): State<Arc<AppState>>) -> Json<MonitorListResponse> {
    let events = state.registry.event_ids();
    let count = events.len();
    Json(MonitorListResponse { events, count })
}

async fn get_monitor_handler(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<LiveView>, ApiError> {
    state
        .registry
        .get(&event_id)
        .map(Json)
        .ok_or_else(|| not_monitored(&event_id))
}

async fn start_monitor_handler(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<LiveView>, ApiError> {
    let view = state.registry.start(&event_id).map_err(api_error)?;
    info!("Monitor requested for {}", view.event_id);
    Ok(Json(view))
}

async fn stop_monitor_handler(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    state.registry.stop(&event_id).await.map_err(api_error)?;
    Ok(Json(CommandResponse {
        status: "stopped".to_string(),
        event_id,
    }))
}

async fn retry_handler(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    state.registry.retry(&event_id).await.map_err(api_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CommandResponse {
            status: "retrying".to_string(),
            event_id,
        }),
    ))
}

async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    state.registry.refresh(&event_id).await.map_err(api_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CommandResponse {
            status: "refreshing".to_string(),
            event_id,
        }),
    ))
}

/// WebSocket upgrade handler. Unknown events are rejected before upgrading.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Response {
    match state.registry.watch(&event_id) {
        Some(views) => ws
            .on_upgrade(move |socket| handle_socket(socket, event_id, views))
            .into_response(),
        None => not_monitored(&event_id).into_response(),
    }
}

/// Push the current view, then every later one, until either side goes away.
async fn handle_socket(
    socket: WebSocket,
    event_id: String,
    mut views: watch::Receiver<LiveView>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    counter!("live_monitor_ws_connections_total").increment(1);
    gauge!("live_monitor_ws_active_connections").increment(1.0);
    info!("View client connected for {}", event_id);

    let initial = views.borrow_and_update().clone();
    if send_view(&mut ws_tx, &initial).await.is_ok() {
        let mut ping_interval = interval(Duration::from_secs(30));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error for {} view client: {:?}", event_id, e);
                        break;
                    }
                },

                changed = views.changed() => {
                    if changed.is_err() {
                        debug!("Session for {} ended, closing view client", event_id);
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    let view = views.borrow_and_update().clone();
                    if send_view(&mut ws_tx, &view).await.is_err() {
                        break;
                    }
                }

                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    gauge!("live_monitor_ws_active_connections").decrement(1.0);
    info!("View client disconnected for {}", event_id);
}

async fn send_view<S>(ws_tx: &mut S, view: &LiveView) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(view) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize view for {}: {}", view.event_id, e);
            return Err(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}
