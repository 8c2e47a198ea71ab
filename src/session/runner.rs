//! Stage runner and the clarification round-trip.
//!
//! A stage run hands the agent a [`StageHooks`] value. The hooks are the
//! only way the agent reaches the outside world: progress and tool events go
//! to the outbound channel, and [`StageHooks::ask_user`] publishes a
//! `user-input-request` and suspends on the inbound reply channel until the
//! matching answer arrives.
//!
//! The hooks are borrowed mutably for the whole run, so two clarification
//! round-trips within a stage can never overlap.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::StageAgent;
use crate::channel::{EventPublisher, ReplySubscriber};
use crate::models::document::TaskSpecs;
use crate::models::event::{Control, Inbound, OutboundEvent, ToolInvocation};
use crate::models::session::{SessionLifecycle, SessionState};
use crate::models::stage::{StageKind, StageResult};
use crate::{AppError, Result};

/// Callback surface exposed to an agent while one stage runs.
pub struct StageHooks<'s> {
    stage_index: usize,
    stage_name: String,
    events: &'s EventPublisher,
    replies: &'s mut ReplySubscriber,
    lifecycle: &'s mut SessionLifecycle,
    clarification_timeout: Option<Duration>,
    tool_calls: Vec<ToolInvocation>,
    clarifications: usize,
}

impl<'s> StageHooks<'s> {
    /// Hooks for the stage at `stage_index` of the session.
    #[must_use]
    pub fn new(
        stage_index: usize,
        stage_name: impl Into<String>,
        events: &'s EventPublisher,
        replies: &'s mut ReplySubscriber,
        lifecycle: &'s mut SessionLifecycle,
        clarification_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stage_index,
            stage_name: stage_name.into(),
            events,
            replies,
            lifecycle,
            clarification_timeout,
            tool_calls: Vec::new(),
            clarifications: 0,
        }
    }

    /// Name of the running stage.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Clarification round-trips completed so far in this stage.
    #[must_use]
    pub fn clarifications(&self) -> usize {
        self.clarifications
    }

    /// Tool invocations recorded so far.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolInvocation] {
        &self.tool_calls
    }

    /// Forward progress text to the client.
    pub fn progress(&self, content: impl Into<String>) {
        self.events.publish(OutboundEvent::Progress {
            content: content.into(),
        });
    }

    /// Record a tool invocation and forward it to the client.
    pub fn tool_invoked(&mut self, tool_name: &str, args: Value, tool_call_id: &str) {
        let invocation = ToolInvocation {
            tool_name: tool_name.to_owned(),
            args,
            tool_call_id: tool_call_id.to_owned(),
        };
        self.events.publish(OutboundEvent::ToolCall {
            tool_name: invocation.tool_name.clone(),
            args: invocation.args.clone(),
            tool_call_id: invocation.tool_call_id.clone(),
        });
        self.tool_calls.push(invocation);
    }

    /// Ask the operator `question` and wait for the answer.
    ///
    /// Replies that were queued before the request went out have no owner
    /// and are discarded. A reply tagged with a different `request_id` is
    /// discarded as well; an untagged reply answers the pending request.
    ///
    /// Only replies the listener has already published are recognised as
    /// stale. An untagged reply still in flight on the connection when the
    /// request goes out is indistinguishable from an answer; clients that
    /// need exact pairing should echo the `request_id`.
    ///
    /// # Errors
    ///
    /// - `AppError::Disconnected` if the connection closes while waiting, or
    ///   the event sender has stopped so the question cannot be delivered.
    /// - `AppError::Cancelled` if the client sends a cancel message.
    /// - `AppError::Timeout` if the clarification deadline elapses.
    pub async fn ask_user(&mut self, question: &str) -> Result<String> {
        self.discard_stale_replies()?;

        let request_id = Uuid::new_v4().to_string();
        self.lifecycle.transition(SessionState::AwaitingUserInput {
            stage: self.stage_index,
        })?;
        info!(
            session_id = %self.lifecycle.session_id(),
            stage = %self.stage_name,
            request_id = %request_id,
            "awaiting clarification"
        );
        if !self.events.publish(OutboundEvent::UserInputRequest {
            request_id: request_id.clone(),
            content: question.to_owned(),
        }) {
            warn!(request_id = %request_id, "event sender gone, question cannot reach the client");
            return Err(AppError::Disconnected);
        }

        let reply = match self.clarification_timeout {
            Some(limit) => tokio::time::timeout(limit, self.await_reply(&request_id))
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "no clarification reply within {}s",
                        limit.as_secs()
                    ))
                })??,
            None => self.await_reply(&request_id).await?,
        };

        self.lifecycle.transition(SessionState::Running {
            stage: self.stage_index,
        })?;
        self.clarifications += 1;
        debug!(request_id = %request_id, "clarification received");
        Ok(reply)
    }

    async fn await_reply(&mut self, request_id: &str) -> Result<String> {
        let events = self.events;
        loop {
            let item = tokio::select! {
                biased;

                () = events.closed() => {
                    warn!(request_id, "event sender gone while awaiting a reply");
                    return Err(AppError::Disconnected);
                }
                item = self.replies.take() => item,
            };
            match item {
                None | Some(Inbound::Control(Control::Closed)) => {
                    return Err(AppError::Disconnected)
                }
                Some(Inbound::Control(Control::Cancel)) => return Err(AppError::Cancelled),
                Some(Inbound::Reply(reply)) => match reply.request_id.as_deref() {
                    Some(id) if id != request_id => {
                        warn!(
                            expected = request_id,
                            received = id,
                            "reply for unknown request, discarding"
                        );
                    }
                    _ => return Ok(reply.content),
                },
            }
        }
    }

    fn discard_stale_replies(&mut self) -> Result<()> {
        while let Some(item) = self.replies.try_take() {
            match item {
                Inbound::Reply(reply) => warn!(
                    session_id = %self.lifecycle.session_id(),
                    request_id = ?reply.request_id,
                    "reply received with no pending request, discarding"
                ),
                Inbound::Control(Control::Closed) => return Err(AppError::Disconnected),
                Inbound::Control(Control::Cancel) => return Err(AppError::Cancelled),
            }
        }
        Ok(())
    }
}

/// Run one stage's agent against `doc` and return its structured result.
///
/// Agent failures propagate unchanged; nothing is merged here.
///
/// # Errors
///
/// Returns the agent's error, a prompt-construction error, or
/// `AppError::Stage` if the agent's final answer is not a JSON object.
pub async fn run_stage(
    agent: &dyn StageAgent,
    stage: &StageKind,
    doc: &TaskSpecs,
    hooks: &mut StageHooks<'_>,
) -> Result<StageResult> {
    let prompt = stage.build_prompt(doc)?;
    debug!(stage = %stage, prompt_len = prompt.len(), "running stage agent");

    let output = agent.run(stage.agent(), prompt, hooks).await?;
    let fields = post_process(&output)?;

    Ok(StageResult {
        fields,
        tool_calls: std::mem::take(&mut hooks.tool_calls),
    })
}

/// Parse an agent's final answer into a JSON object.
///
/// Accepts bare JSON or JSON wrapped in a Markdown code fence.
///
/// # Errors
///
/// Returns `AppError::Stage` if no JSON object can be read from `output`.
pub fn post_process(output: &str) -> Result<Map<String, Value>> {
    let body = strip_code_fence(output.trim());
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(AppError::Stage(format!(
            "agent answer is not a JSON object: {other}"
        ))),
        Err(err) => Err(AppError::Stage(format!("agent answer is not valid JSON: {err}"))),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
