//! WebSocket ping pump: periodic keepalive pings.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use chunkline_protocol::constants::WS_PING_PERIOD;

/// Queues a ping every [`WS_PING_PERIOD`] until cancelled.
///
/// A ping is skipped rather than queued behind a full outbound queue: the
/// pending frames already keep the link busy.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    url: Arc<str>,
) {
    let mut interval = tokio::time::interval(WS_PING_PERIOD);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match write_tx.try_send(tungstenite::Message::Ping(Vec::new().into())) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => trace!(%url, "outbound queue full, ping skipped"),
                    Err(TrySendError::Closed(_)) => {
                        debug!(%url, "outbound queue closed, ping pump stopping");
                        break;
                    }
                }
            }
        }
    }
}
