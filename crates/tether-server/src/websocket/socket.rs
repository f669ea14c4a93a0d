//! Lifecycle of one accepted WebSocket, from upgrade through disconnect.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tether_core::ids::{ConnectionId, SessionKey};
use tether_session::{Connection, Transport};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::server::AppState;

/// How long the writer gets to flush and send Close after the read side ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one accepted socket.
///
/// 1. Wraps the socket's write half in a [`Connection`]
/// 2. Registers (or resumes) the session for `key` and binds the connection
/// 3. Feeds text frames, and UTF-8 binary frames, to the session
/// 4. On close, detaches the session from this connection only
#[instrument(skip_all, fields(session_key = %key))]
pub async fn run_ws_session(socket: WebSocket, key: SessionKey, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.channel_capacity);
    let connection = Arc::new(Connection::new(ConnectionId::new(), send_tx));
    let connection_id = connection.connection_id().clone();
    let close = connection.close_token();
    let shutdown = state.shutdown.token();

    let started = Instant::now();
    let _ = state.connections.fetch_add(1, Ordering::Relaxed);
    counter!("tether_ws_connections_total").increment(1);
    gauge!("tether_ws_connections_active").increment(1.0);
    info!(connection_id = %connection_id, "client connected");

    let session = state.registry.register_or_attach(
        key,
        Arc::clone(&connection) as Arc<dyn Transport>,
        &state.handlers,
    );

    let writer_close = close.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.as_str().to_owned().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_close.cancelled() => {
                    while let Ok(frame) = send_rx.try_recv() {
                        if ws_tx.send(Message::Text(frame.as_str().to_owned().into())).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        let next = tokio::select! {
            msg = ws_rx.next() => msg,
            () = close.cancelled() => {
                debug!(connection_id = %connection_id, "connection closed locally");
                break;
            }
            () = shutdown.cancelled() => {
                debug!(connection_id = %connection_id, "server shutting down");
                break;
            }
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(connection_id = %connection_id, len = data.len(), "ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                info!(connection_id = %connection_id, "client closed connection");
                break;
            }
            Some(Err(err)) => {
                debug!(connection_id = %connection_id, error = %err, "read failed");
                break;
            }
        };

        counter!("tether_ws_frames_received_total").increment(1);
        let _ = session.handle_message(&text);
    }

    if session.detach(connection_id.as_str()) {
        state.registry.notify_disconnect(&session);
    }
    connection.close();
    let writer_abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(connection_id = %connection_id, "writer did not finish in time");
        writer_abort.abort();
    }

    let _ = state.connections.fetch_sub(1, Ordering::Relaxed);
    counter!("tether_ws_disconnections_total").increment(1);
    gauge!("tether_ws_connections_active").decrement(1.0);
    histogram!("tether_ws_connection_duration_seconds").record(started.elapsed().as_secs_f64());
    if connection.drop_count() > 0 {
        info!(connection_id = %connection_id, dropped = connection.drop_count(), "frames dropped on full buffer");
    }
    info!(connection_id = %connection_id, "client disconnected");
}
