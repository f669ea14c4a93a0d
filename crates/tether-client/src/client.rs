//! Reconnecting client endpoint.

use std::sync::{Arc, Weak};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tether_core::errors::{ProtocolError, TransportError};
use tether_core::ids::{ConnectionId, SessionKey};
use tether_session::{
    Connection, HandlerSet, MessageHandler, OutboundQueue, SendGuard, Session, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;

/// A live socket: its connection handle and the reader task feeding the queue.
struct Link {
    connection: Arc<Connection>,
    reader: JoinHandle<()>,
}

/// The initiating endpoint.
///
/// All traffic, both directions, passes through one [`OutboundQueue`]:
/// inbound frames are dispatched ahead of outbound sends, and outbound sends
/// are spaced by `min_send_interval`.
pub struct Client {
    config: ClientConfig,
    session: Arc<Session>,
    queue: Arc<OutboundQueue>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Client {
    /// Build a disconnected client. Call [`Client::open`] to dial.
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let session = Session::new(config.session_key.clone(), config.session.clone());
        let queue = OutboundQueue::new(config.min_send_interval);

        let weak: Weak<Session> = Arc::downgrade(&session);
        queue.set_inbound_handler(Arc::new(move |raw: String| {
            if let Some(session) = weak.upgrade() {
                let _ = session.handle_message(&raw);
            }
        }));

        Arc::new(Self {
            config,
            session,
            queue,
            supervisor: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Dial the server.
    ///
    /// A no-op while connected or while a reconnect loop is running.
    /// Fails with a `Connect` transport error if the first dial fails.
    pub async fn open(self: &Arc<Self>) -> Result<(), ProtocolError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        if self.supervising() {
            debug!(session_key = %self.session.key(), "already open");
            return Ok(());
        }

        let link = self.connect_once().await?;
        let supervisor = tokio::spawn(supervise(
            Arc::downgrade(self),
            self.shutdown.clone(),
            link,
        ));
        if let Some(previous) = self.supervisor.lock().replace(supervisor) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop reconnecting and close the connection. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.session.close();
    }

    /// Whether the session currently has a live connection.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Send a message. Returns its sequence id.
    pub fn send(&self, message_type: &str, data: Value) -> u64 {
        self.session.send(message_type, data)
    }

    /// Send a message that is discarded if `guard` fails when its turn to
    /// be sent comes.
    pub fn send_guarded(&self, message_type: &str, data: Value, guard: SendGuard) -> u64 {
        self.session.send_guarded(message_type, data, guard)
    }

    /// Send a message and wait for the reply's data.
    pub async fn request(&self, message_type: &str, data: Value) -> Result<Value, ProtocolError> {
        self.session.request(message_type, data).await
    }

    /// Register the handler for `message_type`.
    pub fn register_handler(
        &self,
        message_type: impl Into<String>,
        handler: impl MessageHandler + 'static,
    ) -> Result<(), ProtocolError> {
        self.session.register_handler(message_type, handler)
    }

    /// Register every handler in `handlers`.
    pub fn register_handlers(&self, handlers: &HandlerSet) {
        self.session.register_handlers(handlers);
    }

    /// Session key presented to the server.
    pub fn session_key(&self) -> &SessionKey {
        self.session.key()
    }

    /// Underlying session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Underlying queue.
    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    fn supervising(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Dial once; on success the new connection is bound to the queue and
    /// the session is (re)attached.
    async fn connect_once(&self) -> Result<Link, TransportError> {
        let url = self.config.connect_url()?;
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::channel::<Arc<String>>(self.config.channel_capacity);
        let connection = Arc::new(Connection::new(ConnectionId::new(), tx));
        let close = connection.close_token();

        let writer_close = close.clone();
        let _ = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        if sink.send(Message::text(frame.as_str().to_owned())).await.is_err() {
                            break;
                        }
                    }
                    () = writer_close.cancelled() => {
                        while let Ok(frame) = rx.try_recv() {
                            if sink.send(Message::text(frame.as_str().to_owned())).await.is_err() {
                                break;
                            }
                        }
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let queue = Arc::clone(&self.queue);
        let reader_close = close.clone();
        let reader = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    msg = stream.next() => msg,
                    () = reader_close.cancelled() => break,
                };
                match next {
                    Some(Ok(Message::Text(text))) => queue.enqueue_incoming(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => queue.enqueue_incoming(text),
                        Err(_) => debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "read failed");
                        break;
                    }
                }
            }
            reader_close.cancel();
        });

        self.queue
            .bind_transport(Arc::clone(&connection) as Arc<dyn Transport>);
        self.session
            .attach(Arc::clone(&self.queue) as Arc<dyn Transport>);
        info!(
            session_key = %self.session.key(),
            connection_id = %connection.connection_id(),
            url = %self.config.url,
            "connected"
        );
        Ok(Link { connection, reader })
    }

    /// Tear down `link` after it dropped or the client closed.
    fn release(&self, link: &Link) {
        link.connection.close();
        let _ = self.queue.unbind_transport(link.connection.id());
        let _ = self.session.detach(self.queue.id());
    }
}

/// Watch the live link and redial whenever it drops, until closed.
///
/// Holds the client weakly, so dropping the last handle ends the loop.
async fn supervise(client: Weak<Client>, shutdown: CancellationToken, mut link: Link) {
    loop {
        tokio::select! {
            _ = &mut link.reader => {}
            () = shutdown.cancelled() => {}
        }

        let Some(this) = client.upgrade() else {
            link.connection.close();
            return;
        };
        this.release(&link);
        let session_key = this.session.key().clone();
        drop(this);

        if shutdown.is_cancelled() {
            debug!(session_key = %session_key, "client closed, not reconnecting");
            return;
        }
        warn!(session_key = %session_key, "connection lost, reconnecting");

        match reconnect(&client, &shutdown, &session_key).await {
            Some(next) => link = next,
            None => return,
        }
    }
}

async fn reconnect(
    client: &Weak<Client>,
    shutdown: &CancellationToken,
    session_key: &SessionKey,
) -> Option<Link> {
    let mut failures: u32 = 0;
    loop {
        let delay = client
            .upgrade()?
            .config
            .backoff
            .delay(failures, rand::random::<f64>());
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shutdown.cancelled() => return None,
        }

        let this = client.upgrade()?;
        match this.connect_once().await {
            Ok(link) => {
                info!(session_key = %session_key, attempts = failures + 1, "reconnected");
                return Some(link);
            }
            Err(err) => {
                failures += 1;
                warn!(
                    session_key = %session_key,
                    error = %err,
                    error_kind = err.kind(),
                    failures,
                    "reconnect failed"
                );
                if this.config.backoff.exhausted(failures) {
                    error!(session_key = %session_key, failures, "giving up on reconnect");
                    return None;
                }
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
