//! Connection listener task.
//!
//! Reads client text for the lifetime of the session and publishes each
//! classified message on the reply channel. Replies are enqueued whether or
//! not a clarification is pending; pairing them with requests is the stage
//! runner's job.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::ReplyPublisher;
use crate::models::event::{classify_inbound, Control, Inbound};
use crate::transport::ClientSource;
use crate::AppError;

/// Signals raised by the listener for the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ListenerSignals {
    /// Fired when the client connection closes or fails.
    pub disconnected: CancellationToken,
    /// Fired when the client sends a cancel message.
    pub cancel_requested: CancellationToken,
}

impl ListenerSignals {
    /// The error matching a signal that has already fired, if any.
    #[must_use]
    pub fn interruption(&self) -> Option<AppError> {
        if self.disconnected.is_cancelled() {
            Some(AppError::Disconnected)
        } else if self.cancel_requested.is_cancelled() {
            Some(AppError::Cancelled)
        } else {
            None
        }
    }
}

/// Run the listener until the connection closes or `stop` fires.
///
/// A close or transport failure publishes [`Control::Closed`] and fires
/// `signals.disconnected`, so a stage suspended on a clarification fails
/// promptly instead of hanging. Unparseable messages, including frames the
/// source reports as `AppError::Protocol`, are logged and skipped.
pub async fn run_listener<S: ClientSource>(
    session_id: String,
    mut source: S,
    replies: ReplyPublisher,
    signals: ListenerSignals,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = stop.cancelled() => {
                debug!(session_id, "listener: stop requested");
                break;
            }

            message = source.recv() => {
                match message {
                    None => {
                        debug!(session_id, "listener: client closed connection");
                        mark_closed(&replies, &signals);
                        break;
                    }
                    Some(Err(AppError::Protocol(reason))) => {
                        warn!(session_id, reason, "listener: unreadable client message, discarding");
                    }
                    Some(Err(err)) => {
                        warn!(session_id, error = %err, "listener: read failed, treating as disconnect");
                        mark_closed(&replies, &signals);
                        break;
                    }
                    Some(Ok(text)) => match classify_inbound(&text) {
                        Some(Inbound::Control(Control::Cancel)) => {
                            debug!(session_id, "listener: cancel requested by client");
                            replies.publish(Inbound::Control(Control::Cancel));
                            signals.cancel_requested.cancel();
                        }
                        Some(item) => {
                            replies.publish(item);
                        }
                        None => {}
                    },
                }
            }
        }
    }
}

fn mark_closed(replies: &ReplyPublisher, signals: &ListenerSignals) {
    replies.publish(Inbound::Control(Control::Closed));
    signals.disconnected.cancel();
}
