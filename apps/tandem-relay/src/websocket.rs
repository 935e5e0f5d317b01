use std::net::SocketAddr;
use std::ops::ControlFlow;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tandem_proto::{ClientFrame, RelayFrame};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::hub::{FrameSender, RelayError, RelayHub};

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(hub): State<RelayHub>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, hub, remote_addr))
}

async fn handle_socket(socket: WebSocket, session_id: String, hub: RelayHub, remote_addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RelayFrame>();

    // Frames are written by one task so the hub can queue to this socket
    // without awaiting.
    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, RelayFrame::JoinError { .. });
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => error!(session = %writer_session, "failed to encode frame: {err}"),
            }
            if closing {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
        debug!(session = %writer_session, "frame writer ended");
    });

    debug!(session = %session_id, %remote_addr, "websocket connected");

    let mut joined: Option<String> = None;
    while let Some(msg_result) = receiver.next().await {
        let msg = match msg_result {
            Ok(msg) => msg,
            Err(err) => {
                warn!(session = %session_id, %remote_addr, "websocket error: {err}");
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    let _ = tx.send(RelayFrame::Error {
                        message: "binary frames must carry UTF-8 JSON".to_string(),
                    });
                    continue;
                }
            },
            Message::Close(_) => {
                debug!(session = %session_id, %remote_addr, "close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session = %session_id, %remote_addr, "invalid frame: {err}");
                let _ = tx.send(RelayFrame::Error {
                    message: format!("Invalid message format: {err}"),
                });
                continue;
            }
        };

        match handle_client_frame(frame, &session_id, &hub, &tx, &mut joined) {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => break,
            Err(err) => {
                debug!(session = %session_id, peer = ?joined, "frame refused: {err}");
                let _ = tx.send(RelayFrame::Error {
                    message: err.to_string(),
                });
            }
        }
    }

    if let Some(peer_id) = joined {
        hub.leave(&session_id, &peer_id);
    }
    drop(tx);
    let _ = writer.await;
    debug!(session = %session_id, %remote_addr, "websocket disconnected");
}

fn handle_client_frame(
    frame: ClientFrame,
    session_id: &str,
    hub: &RelayHub,
    tx: &FrameSender,
    joined: &mut Option<String>,
) -> Result<ControlFlow<()>, RelayError> {
    match frame {
        ClientFrame::Join { peer_id, label } => {
            if let Some(existing) = joined {
                return Err(RelayError::AlreadyJoined(existing.clone()));
            }
            match hub.join(session_id, peer_id, label, tx.clone()) {
                Ok(admitted) => {
                    info!(session = %session_id, peer = %admitted.peer_id, "join accepted");
                    *joined = Some(admitted.peer_id);
                }
                Err(err @ RelayError::SessionFull(_)) => {
                    info!(session = %session_id, "join refused: {err}");
                    let _ = tx.send(RelayFrame::JoinError {
                        reason: err.to_string(),
                    });
                    return Ok(ControlFlow::Break(()));
                }
                Err(err) => return Err(err),
            }
        }
        ClientFrame::Signal { signal } => {
            let from = joined.as_deref().ok_or(RelayError::NotJoined)?;
            hub.forward(session_id, from, signal)?;
        }
        ClientFrame::Ping => {
            if let Some(peer_id) = joined.as_deref() {
                hub.touch(session_id, peer_id);
            }
            let _ = tx.send(RelayFrame::Pong);
        }
    }
    Ok(ControlFlow::Continue(()))
}
