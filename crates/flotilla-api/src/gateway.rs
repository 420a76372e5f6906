//! HTTP/WebSocket gateway.
//!
//! External clients reach the operation channels through `/ws`: each
//! frame names a channel, carries a caller-chosen `requestId`, and gets
//! exactly one reply echoing that id verbatim. Service instances report
//! per-request outcomes through `POST /events`, which archives the
//! event and publishes it on the response-event channel.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::{Value, json};
use tracing::{debug, warn};

use flotilla_broker::{Bus, CallBroker};
use flotilla_core::{RESPONSES_CHANNEL, ResponseEvent};
use flotilla_stats::EventArchive;

/// Shared state for gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub bus: Bus,
    pub broker: CallBroker,
    pub archive: Arc<dyn EventArchive>,
}

/// Response wrapper for consistent HTTP responses.
#[derive(serde::Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            error: None,
        })
    }

    fn error(message: &str) -> Json<Self> {
        Json(Self {
            success: false,
            error: Some(message.to_string()),
        })
    }
}

/// Build the gateway router.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/events", post(ingest_event))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    ApiResponse::ok()
}

/// POST /events — accept a per-request outcome from a service instance.
async fn ingest_event(
    State(state): State<GatewayState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let Some(event) = ResponseEvent::from_value(payload.clone()) else {
        debug!("rejected malformed response event");
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::error("payload is not a valid response event"),
        );
    };

    // Archive failures must not break live ingestion; the event is
    // still published for the aggregator.
    if let Err(e) = state.archive.append(&event).await {
        warn!(error = %e, "failed to archive response event");
    }
    state.bus.publish(RESPONSES_CHANNEL, payload);

    (StatusCode::ACCEPTED, ApiResponse::ok())
}

/// GET /ws — upgrade and relay operation calls.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(mut socket: WebSocket, state: GatewayState) {
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            debug!("ignoring non-JSON websocket frame");
            continue;
        };
        // The caller-chosen id is echoed verbatim in the reply.
        let Some(request_id) = frame.get("requestId").cloned() else {
            continue;
        };

        let reply = match frame.get("channel").and_then(Value::as_str) {
            Some(channel) => {
                let params = frame.get("params").cloned().unwrap_or(Value::Null);
                match state.broker.call(channel, params).await {
                    Ok(data) => json!({"requestId": request_id, "data": data}),
                    Err(e) => json!({"requestId": request_id, "error": e.to_string()}),
                }
            }
            None => json!({"requestId": request_id, "error": "missing channel"}),
        };

        if socket
            .send(Message::Text(reply.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
    debug!("websocket session closed");
}
