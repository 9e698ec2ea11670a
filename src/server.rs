use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde_json::json;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::engine::EngineStatus;
use crate::engine::SyncEngine;
use crate::error::Error;
use crate::webhook::SECRET_HEADER;

#[derive(Clone)]
struct AppState {
    engine:   Arc<SyncEngine>,
    shutdown: CancellationToken,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::FORBIDDEN,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Store details stay in the log.
    fn public_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        }
        else {
            "Internal server error".to_string()
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.code(),
            "message": self.public_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// All HTTP routes of the service. Open WebSocket streams end when `shutdown` fires.
pub fn router(engine: Arc<SyncEngine>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(subscribe))
        .route("/webhook/update-stock", post(update_stock))
        .route("/webhook/update-offer", post(update_offer))
        .with_state(AppState { engine, shutdown })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serves [`router`] on `listener` until `shutdown` is cancelled.
pub async fn serve(engine: Arc<SyncEngine>, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Inventory sync server is listening on {addr}");
    }

    let app = router(engine, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

fn credential(headers: &HeaderMap) -> Option<&str> {
    headers.get(SECRET_HEADER).and_then(|value| value.to_str().ok())
}

async fn update_stock(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, Error> {
    let outcome = state
        .engine
        .webhook()
        .update_stock(credential(&headers), &body)
        .await?;
    Ok(Json(json!({ "success": true, "message": outcome.message() })))
}

async fn update_offer(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, Error> {
    let outcome = state
        .engine
        .webhook()
        .update_offer(credential(&headers), &body)
        .await?;
    Ok(Json(json!({ "success": true, "message": outcome.message() })))
}

async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(mut socket: WebSocket, state: AppState) {
    let hub = state.engine.hub().clone();
    let (id, mut events) = hub.channel(state.engine.subscriber_buffer());
    info!(subscriber = id, "Client connected for inventory updates");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            event = events.recv() => {
                let Some(event) = event
                else {
                    break;
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(subscriber = id, "Can't encode {} event: {err}", event.event);
                        continue;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Subscribers only listen.
                    Some(Ok(_)) => debug!(subscriber = id, "Ignoring inbound frame"),
                }
            }
        }
    }

    hub.leave(id);
    info!(subscriber = id, "Client disconnected");
}
