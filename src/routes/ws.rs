use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::notification::RequestEvent;

/// GET /ws: live feed of request events.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.notifier.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, events))
}

async fn stream_events(mut socket: WebSocket, mut events: broadcast::Receiver<RequestEvent>) {
    let client_id = Uuid::new_v4();
    info!(%client_id, "WebSocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%client_id, error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    if let Err(e) = socket.send(Message::Text(text.into())).await {
                        warn!(%client_id, error = %e, "Failed to send event, dropping client");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%client_id, skipped, "WebSocket client lagging, events skipped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => debug!(%client_id, "Ignoring client message"),
            },
        }
    }

    info!(%client_id, "WebSocket client disconnected");
}
