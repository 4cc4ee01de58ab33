//! WebSocket write pump: serialises outbound frames.

use std::sync::Arc;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Writes queued frames to the socket until cancelled or the queue closes.
///
/// A failed write tears the whole link down. Returns the number of frames
/// written, not counting the final close frame.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
    url: Arc<str>,
) -> u64
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut written = 0u64;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = write_rx.recv() => frame,
        };
        let Some(frame) = frame else { break };

        let len = frame.len();
        if let Err(e) = write.send(frame).await {
            error!(%url, len, written, "write to upload server failed: {e}");
            cancel.cancel();
            break;
        }
        written += 1;
    }

    debug!(%url, written, "write pump stopped");
    let _ = write.send(tungstenite::Message::Close(None)).await;
    written
}
