//! HTTP/WebSocket transport.
//!
//! Mounts one WebSocket endpoint per stage selector (`/<selector>/ws`) plus
//! a `/health` probe behind an axum router. Each upgraded socket is split
//! into a [`WsSource`] and a [`WsSink`] and handed to a fresh session
//! coordinator.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BoxFuture, ClientSink, ClientSource};
use crate::models::event::OutboundEvent;
use crate::models::stage::StageSelector;
use crate::session::coordinator::run_session;
use crate::session::AppState;
use crate::{AppError, Result};

/// Read half of an axum WebSocket.
pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

/// Write half of an axum WebSocket.
pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

/// Split an upgraded socket into session halves.
#[must_use]
pub fn split_socket(socket: WebSocket) -> (WsSource, WsSink) {
    let (sink, stream) = socket.split();
    (WsSource { stream }, WsSink { sink })
}

impl ClientSource for WsSource {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await? {
                    Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => {
                        return Some(String::from_utf8(bytes.to_vec()).map_err(|err| {
                            AppError::Protocol(format!("binary frame is not utf-8: {err}"))
                        }));
                    }
                    Ok(Message::Close(_)) => return None,
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Err(err) => return Some(Err(AppError::Transport(err.to_string()))),
                }
            }
        })
    }
}

impl ClientSink for WsSink {
    fn send(&mut self, event: OutboundEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let text = serde_json::to_string(&event)
                .map_err(|err| AppError::Transport(format!("failed to serialise event: {err}")))?;
            self.sink
                .send(Message::Text(text.into()))
                .await
                .map_err(|err| AppError::Transport(err.to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.sink
                .close()
                .await
                .map_err(|err| AppError::Transport(err.to_string()))
        })
    }
}

/// `GET /health` response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Always `healthy` when the server answers.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Server time.
    pub timestamp: DateTime<Utc>,
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now(),
    })
}

/// Query parameters accepted by the stage endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    /// Task document name; defaults to `default_task`.
    pub task: Option<String>,
}

async fn stage_ws(
    ws: WebSocketUpgrade,
    Path(selector): Path<String>,
    Query(query): Query<TaskQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let selector = match selector.parse::<StageSelector>() {
        Ok(selector) => selector,
        Err(err) => return (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    };
    let task = query
        .task
        .filter(|task| !task.is_empty())
        .unwrap_or_else(|| state.config.default_task.clone());

    debug!(selector = selector.as_str(), task, "upgrading stage connection");
    ws.on_upgrade(move |socket| async move {
        let (source, sink) = split_socket(socket);
        let _report = run_session(state, selector, task, source, sink).await;
    })
}

/// Build the HTTP router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{selector}/ws", get(stage_ws))
        .with_state(state)
}

/// Serve the router on `http_host:http_port` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or the server fails
/// to bind.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind: SocketAddr = format!("{}:{}", state.config.http_host, state.config.http_port)
        .parse()
        .map_err(|err| AppError::Config(format!("invalid bind address: {err}")))?;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind on {bind}: {err}")))?;

    info!(%bind, "starting WebSocket transport");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("server error: {err}")))?;

    info!("WebSocket transport shut down");
    Ok(())
}
