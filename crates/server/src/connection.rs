//! Client connection management: read/write pumps, ping/pong, send buffering.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use chunkline_protocol::constants::{
    MessageType, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT,
};
use chunkline_protocol::envelope::Message;
use chunkline_protocol::{ErrorKind, parse_append_frame};

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Handle for sending messages to a connected client.
///
/// Cloneable and cheap: wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` only if the buffer is full or the client is gone.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(
        &self,
        req: &Message,
        kind: ErrorKind,
        message: &str,
    ) -> Result<(), SendError> {
        self.send_msg(req.reply_error(kind, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// A sender wired to a plain channel instead of a socket.
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        (Self { tx }, rx)
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to one client.
///
/// Owns the read/write pump tasks and provides a [`Sender`].
pub struct ClientConnection {
    pub peer_addr: SocketAddr,
    sender: Sender,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals the pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tasks and stop when the connection closes
/// or `server_cancel` fires. `on_exit` runs once the read pump is done.
pub fn spawn_connection<S, H, F>(
    ws_stream: S,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    server_cancel: CancellationToken,
    on_exit: F,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let conn = ClientConnection {
        peer_addr,
        sender: sender.clone(),
        cancel: cancel.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel;
    tokio::spawn(async move {
        read_pump(ws_stream, sender, handler.clone(), read_cancel.clone()).await;
        // When the read pump exits, stop the write pump too.
        read_cancel.cancel();
        handler.on_disconnected().await;
        on_exit();
        info!(%peer_addr, "client disconnected");
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches them to the handler.
///
/// Requests are handled one at a time, in arrival order.
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    // Any inbound frame resets the deadline.
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("no traffic within pong window, closing connection");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > WS_MAX_MESSAGE_SIZE {
                                    error!(
                                        "message exceeds max size ({} > {})",
                                        text.len(),
                                        WS_MAX_MESSAGE_SIZE
                                    );
                                    continue;
                                }
                                dispatch_text(&handler, &sender, &text).await;
                            }
                            WsMessage::Binary(data) => {
                                if data.len() > WS_MAX_MESSAGE_SIZE {
                                    error!(
                                        "binary message exceeds max size ({} > {})",
                                        data.len(),
                                        WS_MAX_MESSAGE_SIZE
                                    );
                                    continue;
                                }
                                dispatch_binary(&handler, &sender, &data).await;
                            }
                            WsMessage::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Pong(_) => trace!("received pong"),
                            WsMessage::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Dispatches a text (JSON) message to the appropriate handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            error!("invalid message JSON: {e}");
            return;
        }
    };

    let s = sender.clone();
    match msg.msg_type {
        MessageType::Open => handler.on_open(s, msg).await,
        MessageType::Close => handler.on_close(s, msg).await,
        MessageType::Remove => handler.on_remove(s, msg).await,
        MessageType::Ping => handler.on_ping(s, msg).await,
        _ => {
            warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg, ErrorKind::BadRequest, "unknown message type");
        }
    }
}

/// Dispatches a binary append frame.
///
/// A frame whose header cannot be decoded has no usable request id; it is
/// logged and dropped, and the client's request times out.
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: &Sender, data: &[u8]) {
    match parse_append_frame(data) {
        Ok(frame) => handler.on_append(sender.clone(), frame).await,
        Err(e) => error!("failed to parse append frame: {e}"),
    }
}
