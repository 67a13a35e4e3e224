use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::Identity;

use crate::error::ClientError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 256;

/// One authenticated gateway connection.
///
/// The connection lives exactly as long as this value: `close()` or dropping
/// it disconnects and ends every subscription made through it.
pub struct Session {
    identity: Identity,
    outgoing: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<GatewayEvent>,
    cancel: CancellationToken,
    writer: JoinHandle<()>,
}

impl Session {
    /// Open a gateway connection at `url` (e.g. `ws://host:port/gateway`) and
    /// identify with `token`. Resolves once the server has joined the session
    /// to the user's channel.
    pub async fn connect(url: &str, token: &str) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let identify = serde_json::to_string(&GatewayCommand::Identify {
            token: token.to_string(),
        })?;
        sink.send(Message::Text(identify.into())).await?;

        let handshake = async {
            while let Some(frame) = stream.next().await {
                match frame? {
                    Message::Text(text) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                        Ok(GatewayEvent::Ready { user_id, username }) => {
                            return Ok(Identity {
                                id: user_id,
                                username,
                            });
                        }
                        Ok(GatewayEvent::InvalidSession { reason }) => {
                            return Err(ClientError::Rejected(reason));
                        }
                        _ => debug!("Ignoring frame before Ready"),
                    },
                    Message::Close(_) => {
                        return Err(ClientError::Handshake("server closed the connection"));
                    }
                    _ => {}
                }
            }
            Err::<Identity, _>(ClientError::Handshake("connection ended before Ready"))
        };
        let identity = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| ClientError::Handshake("timed out waiting for Ready"))??;

        let cancel = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        break;
                    }
                    next = outgoing_rx.recv() => {
                        let Some(msg) = next else { break };
                        if sink.send(msg).await.is_err() {
                            writer_cancel.cancel();
                            break;
                        }
                    }
                }
            }
        });

        let reader_cancel = cancel.clone();
        let reader_events = events.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                                // No subscribers is fine; the event is just dropped
                                Ok(event) => { let _ = reader_events.send(event); }
                                Err(e) => warn!("Unparseable gateway event: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            reader_cancel.cancel();
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        });

        Ok(Self {
            identity,
            outgoing,
            events,
            cancel,
            writer,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// True once the connection has ended, from either side.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fire-and-forget send. Success only means the frame was queued; the
    /// message shows up as a `MessageCreate` echo once persisted.
    pub fn send_message(&self, receiver_id: Uuid, body: &str) -> Result<(), ClientError> {
        self.send_command(&GatewayCommand::SendMessage {
            receiver_id: Some(receiver_id),
            body: body.to_string(),
        })
    }

    pub fn send_command(&self, cmd: &GatewayCommand) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let text = serde_json::to_string(cmd)?;
        self.outgoing
            .send(Message::Text(text.into()))
            .map_err(|_| ClientError::Closed)
    }

    /// Register `handler` for every event pushed to this session from now on.
    /// Events that arrive while no subscription exists are not replayed.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(GatewayEvent) + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        let token = cancel.clone();
        let mut rx = self.events.subscribe();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => handler(event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Subscription lagged by {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Subscription { cancel, task }
    }

    /// Disconnect, sending a close frame first.
    pub async fn close(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.writer).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A registered event handler. Cancelled on `unsubscribe()`, on drop, or when
/// its session closes.
pub struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the handler. Once this returns it will not be called again.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
