//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "WebSocket observer stream of engine notifications."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Each connection is one observer. Frames are JSON `{"event": ..., "data": ...}`
//! objects; the first two are always `mqtt_status` and `state_update`.
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use gridsec_core::Subscription;
use tracing::{debug, warn};

use crate::rest::ApiState;

pub(crate) async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> Response {
    // Subscribe before the handshake completes so the primed snapshot is the
    // state at connection time.
    let subscription = state.engine.subscribe();
    ws.on_upgrade(move |socket| observer_loop(socket, subscription))
}

async fn observer_loop(mut socket: WebSocket, mut subscription: Subscription) {
    debug!("observer connected");
    loop {
        tokio::select! {
            notification = subscription.next() => {
                let Some(notification) = notification else {
                    break;
                };
                let text = match serde_json::to_string(&notification) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, event = notification.event_name(), "failed to serialise notification");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The stream is push-only; anything else from the client is ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("observer disconnected");
}
