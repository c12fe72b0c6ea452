//! WebSocket endpoint for live run progress.
//!
//! One socket observes one document. Every progress event becomes a
//! text frame; the terminal event is the last frame before the server
//! closes the socket.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::pipeline::{ProgressBus, ProgressFrame};

/// Forward a document's progress events over a socket until the run
/// reaches a terminal state or the client goes away.
pub async fn serve_progress(socket: WebSocket, bus: Arc<ProgressBus>, document_id: String) {
    info!(doc_id = %document_id, "Progress socket opened");

    let mut subscription = bus.subscribe(&document_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            event = subscription.recv() => {
                // None means the bus closed the channel: either the
                // terminal event was already drained or this observer
                // was dropped for falling behind.
                let Some(event) = event else {
                    break;
                };

                let frame = ProgressFrame::from(&event);
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(doc_id = %document_id, error = %e, "Failed to serialize progress frame");
                        continue;
                    }
                };

                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    debug!(doc_id = %document_id, "Progress socket closed mid-send");
                    break;
                }

                if event.is_terminal() {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(doc_id = %document_id, "Client closed progress socket");
                        break;
                    }
                    // axum answers pings itself; client payloads are
                    // ignored, this endpoint only streams.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(doc_id = %document_id, error = %e, "Progress socket error");
                        break;
                    }
                }
            }
        }
    }

    bus.unsubscribe(&subscription);
    info!(doc_id = %document_id, "Progress socket closed");
}
