//! [`Handler`] that binds the upload operations onto an [`AssemblyStore`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use chunkline_protocol::envelope::Message;
use chunkline_protocol::{
    AppendFrame, CloseRequest, ErrorKind, MessageType, OpenRequest, OpenResponse, RemoveRequest,
    RemoveResponse, SizeResponse,
};
use chunkline_store::{AssemblyStore, StoreError};

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};

/// Serves `open`, `append`, `close` and `remove` from an [`AssemblyStore`].
pub struct StoreHandler {
    store: Arc<AssemblyStore>,
}

impl StoreHandler {
    pub fn new(store: Arc<AssemblyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<AssemblyStore> {
        &self.store
    }
}

/// Decodes a required request payload, answering `bad_request` on failure.
fn require_payload<T>(sender: &Sender, msg: &Message) -> Option<T>
where
    T: for<'de> serde::Deserialize<'de>,
{
    match msg.parse_payload::<T>() {
        Ok(Some(payload)) => Some(payload),
        Ok(None) => {
            let _ = sender.send_error(msg, ErrorKind::BadRequest, "missing payload");
            None
        }
        Err(e) => {
            let _ = sender.send_error(msg, ErrorKind::BadRequest, &format!("invalid payload: {e}"));
            None
        }
    }
}

/// Sends `result` back as `response_type`, or as an error envelope.
fn respond<T: Serialize>(
    sender: &Sender,
    msg: &Message,
    response_type: MessageType,
    result: Result<T, StoreError>,
) {
    let reply = match result {
        Ok(payload) => match msg.reply(response_type, Some(&payload)) {
            Ok(reply) => reply,
            Err(e) => msg.reply_error(ErrorKind::Internal, format!("encode response: {e}")),
        },
        Err(e) => {
            warn!(request = %msg.id, kind = %e.kind(), "request failed: {e}");
            msg.reply_error(e.kind(), e.to_string())
        }
    };
    let _ = sender.send_msg(reply);
}

impl Handler for StoreHandler {
    fn on_open(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = require_payload::<OpenRequest>(&sender, &msg) else {
                return;
            };
            debug!(name = %req.name, overwrite = req.overwrite, "open");
            let result = self
                .store
                .open(&req.name, req.overwrite)
                .await
                .map(|session_id| OpenResponse { session_id });
            respond(&sender, &msg, MessageType::OpenResponse, result);
        })
    }

    fn on_append(&self, sender: Sender, frame: AppendFrame) -> HandlerFuture<'_> {
        Box::pin(async move {
            let AppendFrame { header, data } = frame;
            let checksum = (!header.checksum.is_empty()).then_some(header.checksum.as_str());
            let result = self
                .store
                .append(
                    &header.name,
                    header.session_id,
                    &data,
                    header.offset,
                    checksum,
                )
                .await
                .map(|size| SizeResponse { size });

            // Binary requests have no envelope of their own; answer with one
            // that carries the header's correlation id.
            let request = Message {
                id: header.id,
                msg_type: MessageType::Append,
                payload: None,
                error: None,
            };
            respond(&sender, &request, MessageType::AppendResponse, result);
        })
    }

    fn on_close(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = require_payload::<CloseRequest>(&sender, &msg) else {
                return;
            };
            let result = self
                .store
                .close(&req.name, req.session_id, req.mtime, req.overwrite)
                .await
                .map(|size| SizeResponse { size });
            respond(&sender, &msg, MessageType::CloseResponse, result);
        })
    }

    fn on_remove(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = require_payload::<RemoveRequest>(&sender, &msg) else {
                return;
            };
            let result = self
                .store
                .remove(&req.name, req.session_id)
                .await
                .map(|()| RemoveResponse {});
            respond(&sender, &msg, MessageType::RemoveResponse, result);
        })
    }
}
