//! Wire-level messages exchanged with the client connection.
//!
//! Outbound messages are serialised as JSON objects tagged by `type`:
//!
//! | `type`               | Meaning                                          |
//! |----------------------|--------------------------------------------------|
//! | `agent-start`        | A stage is about to run                          |
//! | `progress`           | Free-form progress text from the agent           |
//! | `tool-call`          | The agent invoked a tool                         |
//! | `user-input-request` | The agent needs a clarification                  |
//! | `end-of-stage`       | Stage merged and persisted; audit list attached  |
//! | `error`              | Fatal session error                              |
//! | `end`                | End of stream; the connection closes next       |
//!
//! Inbound text is either a plain reply, or a JSON object tagged by `type`
//! (`user-reply`, `cancel`, `ping`).
//!
//! Replies already queued when a `user-input-request` goes out are dropped
//! as stale. An untagged reply still in transit at that moment cannot be told
//! apart from an answer, so clients should echo the request's `request_id` in
//! `user-reply` whenever they need exact pairing:
//!
//! ```json
//! {"type": "user-reply", "request_id": "<id from the request>", "content": "30 days"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// One tool invocation made by an agent, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Tool name.
    pub tool_name: String,
    /// Arguments as passed by the agent.
    pub args: Value,
    /// Backend-assigned call identifier.
    pub tool_call_id: String,
}

/// Event published by the coordinator or a stage runner for the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// A stage is starting.
    AgentStart {
        /// Stage name.
        stage: String,
    },
    /// Progress text.
    Progress {
        /// Human-readable progress message.
        content: String,
    },
    /// The agent invoked a tool.
    ToolCall {
        /// Tool name.
        tool_name: String,
        /// Tool arguments.
        args: Value,
        /// Backend-assigned call identifier.
        tool_call_id: String,
    },
    /// The agent asks the operator a question.
    UserInputRequest {
        /// Correlation identifier the client may echo back.
        request_id: String,
        /// Question text.
        content: String,
    },
    /// A stage merged and was persisted.
    EndOfStage {
        /// Stage name.
        stage: String,
        /// Tool invocations made during the stage.
        tools: Vec<ToolInvocation>,
    },
    /// Fatal session error.
    Error {
        /// Error description.
        content: String,
    },
    /// End-of-stream sentinel; the sender stops after forwarding it.
    End,
}

impl OutboundEvent {
    /// Whether this is the end-of-stream sentinel.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::End)
    }
}

/// Operator answer to a clarification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    /// Request being answered; `None` for plain-text replies.
    pub request_id: Option<String>,
    /// Reply text.
    pub content: String,
}

/// Non-reply inbound signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Client asked to abort the session.
    Cancel,
    /// Client connection closed or failed.
    Closed,
}

/// Item carried on the inbound reply channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A clarification answer.
    Reply(InboundReply),
    /// A control signal.
    Control(Control),
}

/// Structured inbound message format.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    UserReply {
        #[serde(default)]
        request_id: Option<String>,
        content: String,
    },
    Cancel,
    Ping,
}

/// Classify one inbound text message.
///
/// Plain text is a reply to whatever request is pending. Text that looks
/// like a JSON object must parse as a known message; anything else is a
/// protocol anomaly, logged and dropped.
#[must_use]
pub fn classify_inbound(text: &str) -> Option<Inbound> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return Some(Inbound::Reply(InboundReply {
            request_id: None,
            content: text.to_owned(),
        }));
    }

    match serde_json::from_str::<ClientMessage>(trimmed) {
        Ok(ClientMessage::UserReply {
            request_id,
            content,
        }) => Some(Inbound::Reply(InboundReply {
            request_id,
            content,
        })),
        Ok(ClientMessage::Cancel) => Some(Inbound::Control(Control::Cancel)),
        Ok(ClientMessage::Ping) => {
            debug!("keepalive ping from client");
            None
        }
        Err(err) => {
            warn!(error = %err, "unclassifiable client message, discarding");
            None
        }
    }
}
