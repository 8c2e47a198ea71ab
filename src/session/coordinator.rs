//! Session coordinator.
//!
//! Owns one client connection from upgrade to close:
//!
//! 1. Start the listener and sender tasks.
//! 2. Lease and load the task document.
//! 3. Resolve and run stages one at a time. Each stage result is merged and
//!    persisted before the next stage is resolved.
//! 4. Publish the end-of-stream sentinel, stop the listener, wait for both
//!    tasks and close the connection.
//!
//! Any error moves the session straight to its terminal state. The client
//! gets one `error` event (unless it is already gone) before the sentinel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::listener::{run_listener, ListenerSignals};
use super::runner::{run_stage, StageHooks};
use super::sender::run_sender;
use super::AppState;
use crate::channel::{event_channel, EventPublisher, ReplySubscriber};
use crate::models::event::{Inbound, OutboundEvent};
use crate::models::session::{SessionLifecycle, SessionState};
use crate::models::stage::StageSelector;
use crate::pipeline::next_stage;
use crate::transport::{ClientSink, ClientSource};
use crate::{AppError, Result};

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Session identifier used in logs.
    pub session_id: String,
    /// Terminal state reached.
    pub final_state: SessionState,
    /// Every state the session passed through.
    pub history: Vec<SessionState>,
    /// Names of the stages merged and persisted, in order.
    pub stages_completed: Vec<String>,
    /// The error that ended the session, if any.
    pub error: Option<AppError>,
}

/// Run one session for `task` over the given connection halves.
pub async fn run_session<S, K>(
    state: Arc<AppState>,
    selector: StageSelector,
    task: String,
    source: S,
    sink: K,
) -> SessionReport
where
    S: ClientSource,
    K: ClientSink,
{
    let session_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "session",
        session_id = %session_id,
        selector = selector.as_str(),
        task = %task
    );
    drive(state, selector, task, session_id, source, sink)
        .instrument(span)
        .await
}

async fn drive<S, K>(
    state: Arc<AppState>,
    selector: StageSelector,
    task: String,
    session_id: String,
    source: S,
    sink: K,
) -> SessionReport
where
    S: ClientSource,
    K: ClientSink,
{
    let mut lifecycle = SessionLifecycle::new(&session_id);
    let (events, event_rx) = event_channel();
    let (reply_tx, mut replies) = event_channel();
    let signals = ListenerSignals::default();
    let listener_stop = CancellationToken::new();

    let listener = tokio::spawn(
        run_listener(
            session_id.clone(),
            source,
            reply_tx,
            signals.clone(),
            listener_stop.clone(),
        )
        .in_current_span(),
    );
    let sender = tokio::spawn(run_sender(session_id.clone(), event_rx, sink).in_current_span());
    info!("session started");

    let mut completed = Vec::new();
    let outcome = run_stages(
        &state,
        selector,
        &task,
        &events,
        &mut replies,
        &mut lifecycle,
        &signals,
        &mut completed,
    )
    .await;

    let failure = match outcome {
        Ok(()) => lifecycle.transition(SessionState::Finalizing).err(),
        Err(err) => Some(err),
    };

    if let Some(err) = &failure {
        let terminal = SessionState::for_error(err);
        if let Err(transition_err) = lifecycle.transition(terminal) {
            warn!(error = %transition_err, "could not record terminal state");
        }
        if terminal == SessionState::Disconnected {
            warn!(error = %err, "client disconnected, tearing down session");
        } else {
            error!(error = %err, state = ?terminal, "session failed");
            events.publish(OutboundEvent::Error {
                content: err.to_string(),
            });
        }
    }

    // Teardown: sentinel first so the sender drains everything published so
    // far, then stop the listener.
    events.publish(OutboundEvent::End);
    listener_stop.cancel();

    let (listener_result, sender_result) = tokio::join!(listener, sender);
    if let Err(err) = listener_result {
        warn!(error = %err, "listener task did not finish cleanly");
    }
    match sender_result {
        Ok(mut outcome) => {
            debug!(delivered = outcome.delivered, failed = outcome.failed, "sender finished");
            if let Err(err) = outcome.sink.close().await {
                debug!(error = %err, "connection close failed");
            }
        }
        Err(err) => warn!(error = %err, "sender task did not finish cleanly"),
    }
    discard_unclaimed(&mut replies);

    if failure.is_none() {
        if let Err(err) = lifecycle.transition(SessionState::Completed) {
            warn!(error = %err, "could not record completion");
        }
    }

    info!(
        state = ?lifecycle.state(),
        stages = completed.len(),
        "session finished"
    );
    SessionReport {
        session_id,
        final_state: lifecycle.state(),
        history: lifecycle.history().to_vec(),
        stages_completed: completed,
        error: failure,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_stages(
    state: &AppState,
    selector: StageSelector,
    task: &str,
    events: &EventPublisher,
    replies: &mut ReplySubscriber,
    lifecycle: &mut SessionLifecycle,
    signals: &ListenerSignals,
    completed: &mut Vec<String>,
) -> Result<()> {
    let _lease = state.store.lease(task)?;
    let mut doc = state.store.load(task).await?;
    let timeouts = &state.config.timeouts;

    let mut index = 0;
    while let Some(stage) = next_stage(selector, &doc)? {
        if let Some(err) = signals.interruption() {
            return Err(err);
        }
        if events.is_closed() {
            return Err(AppError::Disconnected);
        }
        lifecycle.transition(SessionState::Running { stage: index })?;
        let name = stage.name();
        info!(stage = %name, index, "stage starting");
        if !events.publish(OutboundEvent::AgentStart {
            stage: name.clone(),
        }) {
            return Err(AppError::Disconnected);
        }

        let result = {
            let mut hooks = StageHooks::new(
                index,
                name.clone(),
                events,
                replies,
                lifecycle,
                timeouts.clarification(),
            );
            guarded(
                run_stage(state.agent.as_ref(), &stage, &doc, &mut hooks),
                timeouts.stage(),
                signals,
                events,
            )
            .await?
        };

        let merged = stage.merge(&doc, &result)?;
        doc = state.store.save(task, &merged).await?;
        info!(
            stage = %name,
            version = doc.pipeline.version,
            tools = result.tool_calls.len(),
            "stage merged and persisted"
        );
        events.publish(OutboundEvent::EndOfStage {
            stage: name.clone(),
            tools: result.tool_calls,
        });
        completed.push(name);
        index += 1;
    }
    Ok(())
}

/// Run `work` under the stage deadline, aborting it when the client
/// disconnects or cancels, or when the sender can no longer write.
async fn guarded<T>(
    work: impl Future<Output = Result<T>>,
    deadline: Option<Duration>,
    signals: &ListenerSignals,
    events: &EventPublisher,
) -> Result<T> {
    let timed = async {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                AppError::Timeout(format!("stage exceeded {}s", limit.as_secs()))
            })?,
            None => work.await,
        }
    };
    tokio::select! {
        biased;

        () = signals.disconnected.cancelled() => Err(AppError::Disconnected),
        () = signals.cancel_requested.cancelled() => Err(AppError::Cancelled),
        () = events.closed() => {
            warn!("event sender stopped, treating connection as broken");
            Err(AppError::Disconnected)
        }
        result = timed => result,
    }
}

fn discard_unclaimed(replies: &mut ReplySubscriber) {
    while let Some(item) = replies.try_take() {
        if let Inbound::Reply(reply) = item {
            warn!(
                request_id = ?reply.request_id,
                "reply received with no pending request, discarding"
            );
        }
    }
}
