//! Signaling client — the client side of the rendezvous WebSocket

use super::protocol::{ClientRequest, ServerEvent};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
}

/// Handles to one live signaling session.
///
/// Dropping `requests` closes the write side; `events` ends when the server
/// closes the socket.
pub struct SignalingConnection {
    pub requests: mpsc::UnboundedSender<ClientRequest>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Open the rendezvous WebSocket and spawn the read/write pumps.
pub async fn connect(url: &str) -> Result<SignalingConnection, ClientError> {
    let (socket, _response) = connect_async(url).await.map_err(|e| ClientError::Connect {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    debug!("signaling socket open: {}", url);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<ClientRequest>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Requests → socket
    tokio::spawn(async move {
        while let Some(request) = request_rx.recv().await {
            let Ok(json) = serde_json::to_string(&request) else {
                continue;
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Socket → events
    tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("signaling socket error: {}", e);
                    break;
                }
            };
            match frame {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("unrecognized server event: {}", e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    Ok(SignalingConnection {
        requests: request_tx,
        events: event_rx,
    })
}
