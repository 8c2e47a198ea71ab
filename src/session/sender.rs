//! Event sender task.
//!
//! Forwards outbound events to the client in publish order until the
//! end-of-stream sentinel has been forwarded. The sink is handed back so the
//! coordinator can close the connection afterwards.

use tracing::{debug, warn};

use crate::channel::EventSubscriber;
use crate::transport::ClientSink;

/// How the sender finished.
pub struct SenderOutcome<K> {
    /// The connection's write half, returned for closing.
    pub sink: K,
    /// Events written to the client, the sentinel included.
    pub delivered: usize,
    /// Whether a write failed, leaving later events undelivered.
    pub failed: bool,
}

/// Run the sender until the sentinel is forwarded, a write fails, or every
/// publisher is dropped.
pub async fn run_sender<K: ClientSink>(
    session_id: String,
    mut events: EventSubscriber,
    mut sink: K,
) -> SenderOutcome<K> {
    let mut delivered = 0;
    while let Some(event) = events.take().await {
        let sentinel = event.is_sentinel();
        if let Err(err) = sink.send(event).await {
            warn!(session_id, error = %err, "sender: write failed, stopping");
            return SenderOutcome {
                sink,
                delivered,
                failed: true,
            };
        }
        delivered += 1;
        if sentinel {
            debug!(session_id, delivered, "sender: end of stream forwarded");
            break;
        }
    }
    SenderOutcome {
        sink,
        delivered,
        failed: false,
    }
}
