//! WebSocket connection lifecycle: admission, greeting, read/write loops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use bitgrid_core::grid::encode_snapshot;
use bitgrid_core::protocol::Outbound;

use crate::session::Session;
use crate::state::GatewayState;

/// How long a closing writer waits for the peer to accept the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle a new WebSocket connection from `origin`.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket, origin: SocketAddr) {
    let session = Arc::new(Session::new(origin));
    let session_id = session.id().to_string();
    info!(session_id = %session_id, %origin, "New WebSocket connection");

    let (mut ws_tx, ws_rx) = ws.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(state.config.queue_capacity());

    if let Err(e) = state.hub.register(session.clone(), outbound_tx).await {
        info!(session_id = %session_id, %e, "Connection refused");
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    // Snapshot is read after admission so no toggle falls between the two.
    let greeting = match state.grid.state().await {
        Ok(bits) => [
            Outbound::Snapshot(encode_snapshot(&bits, state.config.snapshot_encoding())),
            Outbound::Assigned(session_id.clone()),
        ],
        Err(e) => {
            error!(session_id = %session_id, %e, "Failed to read grid state");
            state.hub.unregister(&session_id).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            finish(&session_id);
            return;
        }
    };
    for frame in greeting {
        if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
            state.hub.unregister(&session_id).await;
            finish(&session_id);
            return;
        }
    }

    let mut send_task = tokio::spawn(write_loop(session.clone(), ws_tx, outbound_rx));

    tokio::select! {
        _ = read_loop(&state, &session, ws_rx) => {}
        _ = &mut send_task => {
            debug!(session_id = %session_id, "Writer finished first");
        }
    }

    state.hub.unregister(&session_id).await;
    session.close();
    finish(&session_id);
}

fn finish(session_id: &str) {
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
    info!(session_id = %session_id, "WebSocket connection closed");
}

async fn read_loop(state: &GatewayState, session: &Session, mut ws_rx: SplitStream<WebSocket>) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = session.closed() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                state.dispatcher.dispatch(session, text.as_str()).await;
            }
            Some(Ok(Message::Close(_))) => {
                debug!(session_id = %session.id(), "Client requested close");
                break;
            }
            Some(Ok(_)) => {
                // Binary frames carry nothing in this protocol; axum answers pings itself
            }
            Some(Err(e)) => {
                warn!(session_id = %session.id(), %e, "WebSocket read error");
                break;
            }
            None => break,
        }
    }
}

/// Drain the outbound queue into the socket. Ends when the hub closes the
/// queue, the session is force-closed (even mid-write to a peer that stopped
/// reading), or a write fails. The socket is closed on the way out.
async fn write_loop(
    session: Arc<Session>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = session.closed() => break,
            msg = outbound_rx.recv() => msg,
        };
        let Some(msg) = msg else {
            debug!(session_id = %session.id(), "Outbound queue closed");
            break;
        };
        tokio::select! {
            biased;
            _ = session.closed() => break,
            sent = ws_tx.send(Message::Text(msg.into())) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    let closing = async {
        let _ = ws_tx.send(Message::Close(None)).await;
        let _ = ws_tx.close().await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
        debug!(session_id = %session.id(), "Peer did not accept close frame");
    }
}
