//! Upload WebSocket server.
//!
//! Listens on a TCP port, upgrades every accepted connection to WebSocket
//! and runs it against a shared [`Handler`]. Any number of clients may be
//! connected at once.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use chunkline_protocol::constants::{WS_MAX_FRAME_SIZE, WS_MAX_MESSAGE_SIZE};

use crate::ServerError;
use crate::connection;
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

/// The upload WebSocket server.
pub struct UploadServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    connections: Arc<AtomicUsize>,
}

impl<H: Handler> UploadServer<H> {
    /// Creates a new server with the given handler.
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns the handler shared by all connections.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of currently open client connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Gracefully shuts down the server and every open connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("upload server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection to WebSocket and starts its pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_FRAME_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        tracing::info!(%peer_addr, "WebSocket connection established");

        self.connections.fetch_add(1, Ordering::SeqCst);
        let connections = Arc::clone(&self.connections);

        connection::spawn_connection(
            ws_stream,
            peer_addr,
            Arc::clone(&self.handler),
            self.cancel.clone(),
            move || {
                connections.fetch_sub(1, Ordering::SeqCst);
            },
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Sender;
    use crate::handler::HandlerFuture;
    use chunkline_protocol::envelope::Message;
    use chunkline_protocol::{AppendFrame, ErrorKind, MessageType};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

    /// Handler that rejects everything except ping.
    struct RejectingHandler;

    impl Handler for RejectingHandler {
        fn on_open(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                let _ = sender.send_error(&msg, ErrorKind::BadRequest, "no");
            })
        }

        fn on_append(&self, _sender: Sender, _frame: AppendFrame) -> HandlerFuture<'_> {
            Box::pin(async {})
        }

        fn on_close(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                let _ = sender.send_error(&msg, ErrorKind::BadRequest, "no");
            })
        }

        fn on_remove(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                let _ = sender.send_error(&msg, ErrorKind::BadRequest, "no");
            })
        }
    }

    async fn start() -> (Arc<UploadServer<RejectingHandler>>, tokio::task::JoinHandle<()>) {
        let config = ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        };
        let server = UploadServer::new(config, RejectingHandler);
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
        });
        for _ in 0..100 {
            if server.port().await != 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        (server, handle)
    }

    async fn wait_for_connections<H: Handler>(server: &UploadServer<H>, n: usize) {
        for _ in 0..200 {
            if server.connection_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} connections, have {}", server.connection_count());
    }

    async fn next_message<S>(ws: &mut S) -> Message
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let (server, handle) = start().await;
        assert!(server.port().await > 0, "should have bound to a dynamic port");
        assert_eq!(server.connection_count(), 0);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn answers_ping_and_rejects_unknown_types() {
        let (server, handle) = start().await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let ping = Message::new::<()>("p1", MessageType::Ping, None).unwrap();
        ws.send(WsMessage::Text(serde_json::to_string(&ping).unwrap().into()))
            .await
            .unwrap();
        let pong = next_message(&mut ws).await;
        assert_eq!(pong.id, "p1");
        assert_eq!(pong.msg_type, MessageType::Pong);

        let bogus = Message::new::<()>("b1", MessageType::CloseResponse, None).unwrap();
        ws.send(WsMessage::Text(serde_json::to_string(&bogus).unwrap().into()))
            .await
            .unwrap();
        let reply = next_message(&mut ws).await;
        assert_eq!(reply.id, "b1");
        assert_eq!(reply.error.unwrap().kind(), ErrorKind::BadRequest);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn accepts_multiple_connections() {
        let (server, handle) = start().await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);

        let (first, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (mut second, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        wait_for_connections(&server, 2).await;

        drop(first);
        wait_for_connections(&server, 1).await;

        let open = Message::new::<()>("o1", MessageType::Open, None).unwrap();
        second
            .send(WsMessage::Text(serde_json::to_string(&open).unwrap().into()))
            .await
            .unwrap();
        let reply = next_message(&mut second).await;
        assert_eq!(reply.id, "o1");

        server.shutdown();
        handle.await.unwrap();
        wait_for_connections(&server, 0).await;
    }
}
