//! Client connection halves.
//!
//! A session talks to its client through two independent halves so the
//! listener and sender tasks can each own one: [`ClientSource`] yields
//! inbound text messages, [`ClientSink`] writes outbound events and closes
//! the connection. [`ws`] adapts an axum WebSocket; [`memory`] provides an
//! in-process pair.

pub mod memory;
pub mod ws;

use std::future::Future;
use std::pin::Pin;

use crate::models::event::OutboundEvent;
use crate::Result;

/// Boxed `Send` future returned by connection halves.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read half of a client connection.
pub trait ClientSource: Send + 'static {
    /// Wait for the next inbound text message.
    ///
    /// Returns `None` once the client has closed the connection, and
    /// `Some(Err(..))` on a read failure; both end the session's listener.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String>>>;
}

/// Write half of a client connection.
pub trait ClientSink: Send + 'static {
    /// Forward one event to the client.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// client is gone.
    fn send(&mut self, event: OutboundEvent) -> BoxFuture<'_, Result<()>>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// close handshake cannot be written.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}
