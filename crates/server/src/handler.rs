//! Handler trait for processing upload requests.
//!
//! Implementors provide the upload semantics while the server framework
//! handles connection management, routing and the binary frame codec.

use std::future::Future;
use std::pin::Pin;

use chunkline_protocol::envelope::Message;
use chunkline_protocol::{AppendFrame, MessageType};

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling requests from upload clients.
///
/// Each method receives a `sender` to reply on and the decoded request.
/// Every request must be answered, either with its response type or with
/// an error envelope carrying the request id.
pub trait Handler: Send + Sync + 'static {
    /// Called for `open` requests.
    fn on_open(&self, sender: Sender, msg: Message) -> HandlerFuture<'_>;

    /// Called for binary append frames.
    fn on_append(&self, sender: Sender, frame: AppendFrame) -> HandlerFuture<'_>;

    /// Called for `close` requests.
    fn on_close(&self, sender: Sender, msg: Message) -> HandlerFuture<'_>;

    /// Called for `remove` requests.
    fn on_remove(&self, sender: Sender, msg: Message) -> HandlerFuture<'_>;

    /// Called for application-level `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called when a client disconnects (cleanup hook).
    fn on_disconnected(&self) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}
