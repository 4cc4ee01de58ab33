//! WebSocket implementation of [`UploadConnection`].
//!
//! Requests are correlated with responses by a UUID id. The socket is
//! opened lazily and re-opened on the next request after it drops, so a
//! retried request transparently reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chunkline_protocol::constants::{
    DEFAULT_REQUEST_TIMEOUT, MessageType, WS_MAX_FRAME_SIZE, WS_MAX_MESSAGE_SIZE,
};
use chunkline_protocol::envelope::Message;
use chunkline_protocol::{
    AppendHeader, CloseRequest, OpenRequest, OpenResponse, RemoveRequest, RemoveResponse,
    SizeResponse, encode_append_frame,
};

use crate::connection::{RequestFuture, UploadConnection};
use crate::error::RequestError;

/// Requests waiting for their response, keyed by id.
pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// One established socket and its pump tasks.
struct Link {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    async fn establish(url: &str) -> Result<Self, RequestError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_FRAME_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false)
                .await
                .map_err(|e| RequestError::Connectivity(format!("connect to {url}: {e}")))?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(64);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let link_url: Arc<str> = Arc::from(url);

        let writer =
            crate::pumps::write::write_pump(write, write_rx, cancel.clone(), link_url.clone());
        let tasks = vec![
            tokio::spawn(async move {
                writer.await;
            }),
            tokio::spawn(crate::pumps::read::read_pump(
                read,
                pending.clone(),
                write_tx.clone(),
                cancel.clone(),
            )),
            tokio::spawn(crate::pumps::ping::ping_pump(
                write_tx.clone(),
                cancel.clone(),
                link_url,
            )),
        ];

        info!(%url, "connected to upload server");
        Ok(Self {
            write_tx,
            pending,
            cancel,
            tasks,
        })
    }

    fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// [`UploadConnection`] over a WebSocket.
pub struct WsConnection {
    url: String,
    request_timeout: Duration,
    link: Mutex<Option<Arc<Link>>>,
}

impl WsConnection {
    /// Creates a connection that dials `url` on the first request.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            link: Mutex::new(None),
        }
    }

    /// Creates a connection and dials `url` right away.
    pub async fn connect(url: impl Into<String>) -> Result<Self, RequestError> {
        let conn = Self::new(url);
        conn.link().await?;
        Ok(conn)
    }

    /// Upper bound for one round trip.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns `true` if a socket is currently established.
    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.as_ref().is_some_and(|l| l.is_alive())
    }

    /// Closes the socket. The next request reconnects.
    pub async fn disconnect(&self) {
        if let Some(link) = self.link.lock().await.take() {
            let _ = link.write_tx.send(tungstenite::Message::Close(None)).await;
            link.cancel.cancel();
        }
    }

    /// Returns the live link, dialing a new one if needed.
    async fn link(&self) -> Result<Arc<Link>, RequestError> {
        let mut slot = self.link.lock().await;
        if let Some(link) = slot.as_ref()
            && link.is_alive()
        {
            return Ok(Arc::clone(link));
        }

        if slot.is_some() {
            debug!(url = %self.url, "link dropped, reconnecting");
        }
        let link = Arc::new(Link::establish(&self.url).await?);
        *slot = Some(Arc::clone(&link));
        Ok(link)
    }

    /// Sends one frame and waits for the response carrying `id`.
    async fn round_trip(
        &self,
        id: String,
        frame: tungstenite::Message,
    ) -> Result<Message, RequestError> {
        let link = self.link().await?;

        let (tx, rx) = oneshot::channel();
        link.pending.lock().await.insert(id.clone(), tx);

        if link.write_tx.send(frame).await.is_err() {
            link.pending.lock().await.remove(&id);
            return Err(RequestError::Connectivity("connection closed".into()));
        }

        let result = tokio::time::timeout(self.request_timeout, rx).await;
        link.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(RequestError::Connectivity(
                "connection closed before response".into(),
            )),
            Err(_) => Err(RequestError::Connectivity(format!(
                "no response within {:?}",
                self.request_timeout
            ))),
        }
    }

    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        msg_type: MessageType,
        payload: &P,
    ) -> Result<R, RequestError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, Some(payload))
            .map_err(|e| RequestError::Connectivity(format!("encode request: {e}")))?;
        let json = serde_json::to_string(&msg)
            .map_err(|e| RequestError::Connectivity(format!("encode request: {e}")))?;

        let resp = self.round_trip(id, tungstenite::Message::Text(json.into())).await?;
        decode_response(resp, msg_type)
    }
}

/// Turns a response envelope into its payload or a [`RequestError`].
fn decode_response<R: DeserializeOwned>(
    resp: Message,
    request_type: MessageType,
) -> Result<R, RequestError> {
    if let Some(err) = &resp.error {
        return Err(RequestError::Rejected {
            kind: err.kind(),
            message: err.message.clone(),
        });
    }
    if Some(resp.msg_type) != request_type.response_type() {
        return Err(RequestError::Connectivity(format!(
            "unexpected response type {:?}",
            resp.msg_type
        )));
    }
    match resp.parse_payload::<R>() {
        Ok(Some(payload)) => Ok(payload),
        Ok(None) => Err(RequestError::Connectivity("response without payload".into())),
        Err(e) => Err(RequestError::Connectivity(format!("malformed response: {e}"))),
    }
}

impl UploadConnection for WsConnection {
    fn open<'a>(&'a self, req: &'a OpenRequest) -> RequestFuture<'a, OpenResponse> {
        Box::pin(self.request(MessageType::Open, req))
    }

    fn append<'a>(
        &'a self,
        header: &'a AppendHeader,
        data: &'a [u8],
    ) -> RequestFuture<'a, SizeResponse> {
        Box::pin(async move {
            let id = uuid::Uuid::new_v4().to_string();
            let header = AppendHeader {
                id: id.clone(),
                ..header.clone()
            };
            let frame = encode_append_frame(&header, data)
                .map_err(|e| RequestError::Connectivity(format!("encode append: {e}")))?;

            let resp = self
                .round_trip(id, tungstenite::Message::Binary(frame.into()))
                .await?;
            decode_response(resp, MessageType::Append)
        })
    }

    fn close<'a>(&'a self, req: &'a CloseRequest) -> RequestFuture<'a, SizeResponse> {
        Box::pin(self.request(MessageType::Close, req))
    }

    fn remove<'a>(&'a self, req: &'a RemoveRequest) -> RequestFuture<'a, RemoveResponse> {
        Box::pin(self.request(MessageType::Remove, req))
    }
}
