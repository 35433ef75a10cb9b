//! Viewer WebSocket sessions.
//!
//! A connection registers with the core first; the core queues the snapshot
//! and acks with the session id. Only then do we start reading commands.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use slide_proto::protocol::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace};

use crate::broadcaster;
use crate::core::DaemonEvent;
use crate::http::HttpState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HttpState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.event_tx))
}

async fn handle_socket(socket: WebSocket, event_tx: mpsc::Sender<DaemonEvent>) {
    let (tx, mut rx) = broadcaster::session_channel();
    let (ack, ack_rx) = oneshot::channel();

    if event_tx
        .send(DaemonEvent::SessionOpened { sender: tx, ack })
        .await
        .is_err()
    {
        debug!("Core is gone, refusing viewer");
        return;
    }
    let Ok(id) = ack_rx.await else {
        debug!("Viewer registration was dropped");
        return;
    };
    info!("Viewer {} connected", id);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.encode() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        debug!("Viewer {} send failed", id);
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize message: {}", e),
            }
        }
        let _ = ws_sender.close().await;
    });

    let command_tx = event_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match Command::decode(&text) {
                    Ok(cmd) => {
                        if command_tx.send(DaemonEvent::ViewerCommand(cmd)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Viewer {} sent {:?}: {}", id, text, e),
                },
                Ok(Message::Close(_)) => break,
                Ok(other) => trace!("Viewer {} sent non-text frame {:?}", id, other),
                Err(e) => {
                    debug!("Viewer {} socket error: {}", id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let _ = event_tx.send(DaemonEvent::SessionClosed(id)).await;
    info!("Viewer {} disconnected", id);
}
