//! In-process connection pair.
//!
//! [`memory_connection`] returns the server-side halves a session runs on
//! and a [`MemoryClient`] that plays the remote end: it can send text,
//! observe every forwarded event, and hang up.

use tokio::sync::mpsc;

use super::{BoxFuture, ClientSink, ClientSource};
use crate::models::event::OutboundEvent;
use crate::{AppError, Result};

/// What the client observes on its end of the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// An event written by the server.
    Event(OutboundEvent),
    /// The server closed the connection.
    Closed,
}

/// Server-side read half.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server-side write half.
#[derive(Debug)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<ClientFrame>,
}

/// Remote end of an in-process connection.
#[derive(Debug)]
pub struct MemoryClient {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<ClientFrame>,
}

/// Create a connected in-process pair.
#[must_use]
pub fn memory_connection() -> (MemorySource, MemorySink, MemoryClient) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
        MemorySource { rx: in_rx },
        MemorySink { tx: out_tx },
        MemoryClient {
            tx: Some(in_tx),
            rx: out_rx,
        },
    )
}

impl ClientSource for MemorySource {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String>>> {
        Box::pin(async move { self.rx.recv().await.map(Ok) })
    }
}

impl ClientSink for MemorySink {
    fn send(&mut self, event: OutboundEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.tx
                .send(ClientFrame::Event(event))
                .map_err(|_| AppError::Transport("client gone".into()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.tx
                .send(ClientFrame::Closed)
                .map_err(|_| AppError::Transport("client gone".into()))
        })
    }
}

impl MemoryClient {
    /// Send a text message to the server. Returns `false` after hang-up.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Close the client's write side; the server's listener sees EOF.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Drop the client entirely: the server sees EOF and writes fail.
    pub fn disconnect(self) {}

    /// Wait for the next frame from the server.
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        self.rx.recv().await
    }

    /// Wait for the next event; `None` once the server closes or hangs up.
    pub async fn next_event(&mut self) -> Option<OutboundEvent> {
        match self.rx.recv().await? {
            ClientFrame::Event(event) => Some(event),
            ClientFrame::Closed => None,
        }
    }

    /// Collect frames until the server closes the connection.
    pub async fn drain(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.rx.recv().await {
            let closed = frame == ClientFrame::Closed;
            frames.push(frame);
            if closed {
                break;
            }
        }
        frames
    }
}
