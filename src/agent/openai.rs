//! OpenAI-compatible chat-completions backend.
//!
//! Runs a tool loop: the model either answers (final text) or calls
//! `ask_user_a_question`, in which case the question is routed through
//! [`StageHooks::ask_user`] and the operator's answer is fed back as the
//! tool result.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info_span, warn, Instrument};

use super::{prompts, BoxFuture, StageAgent, ASK_USER_TOOL};
use crate::config::GlobalConfig;
use crate::models::stage::AgentKind;
use crate::session::runner::StageHooks;
use crate::{AppError, Result};

/// Model turns allowed beyond one per permitted clarification.
const EXTRA_TURNS: usize = 4;

const CLARIFICATION_BUDGET_SPENT: &str =
    "No more clarifications are allowed. Proceed with your best judgement.";

/// Chat-completions agent backend.
pub struct OpenAiAgent {
    client: reqwest::Client,
    config: Arc<GlobalConfig>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

impl AssistantMessage {
    fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

impl OpenAiAgent {
    /// Create a backend using the `[llm]` and `[stages]` configuration.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn run_loop(
        &self,
        kind: AgentKind,
        prompt: String,
        hooks: &mut StageHooks<'_>,
    ) -> Result<String> {
        if self.config.llm.api_key.is_empty() {
            return Err(AppError::Stage("LLM_API_KEY is not configured".into()));
        }

        let agent = self.config.agent(kind);
        let model = self.config.model_for(kind);
        let allowed = usize::try_from(agent.clarifications).unwrap_or(usize::MAX);
        let mut messages = vec![
            json!({ "role": "system", "content": prompts::system_prompt(kind, agent.clarifications) }),
            json!({ "role": "user", "content": prompt }),
        ];

        let max_turns = allowed.saturating_add(EXTRA_TURNS);
        for turn in 1..=max_turns {
            debug!(agent = kind.config_key(), turn, "requesting completion");
            let message = self.complete(&model, &messages).await?;

            if message.tool_calls().is_empty() {
                return message
                    .content
                    .filter(|text| !text.trim().is_empty())
                    .ok_or_else(|| AppError::Stage("model returned an empty answer".into()));
            }

            if let Some(text) = message.content.as_deref().filter(|t| !t.trim().is_empty()) {
                hooks.progress(text);
            }
            messages.push(assistant_turn(&message));

            for call in message.tool_calls() {
                let args: Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|err| {
                        warn!(tool = %call.function.name, %err, "tool arguments are not JSON");
                        Value::String(call.function.arguments.clone())
                    });
                hooks.tool_invoked(&call.function.name, args.clone(), &call.id);

                let answer = if call.function.name == ASK_USER_TOOL {
                    let question = args
                        .get("question_for_user")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            AppError::Stage(format!("{ASK_USER_TOOL} called without a question"))
                        })?;
                    if hooks.clarifications() >= allowed {
                        CLARIFICATION_BUDGET_SPENT.to_owned()
                    } else {
                        hooks.ask_user(question).await?
                    }
                } else {
                    format!("unknown tool '{}'", call.function.name)
                };

                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": answer,
                }));
            }
        }

        Err(AppError::Stage(format!(
            "{} gave no final answer within {max_turns} turns",
            kind.config_key()
        )))
    }

    async fn complete(&self, model: &str, messages: &[Value]) -> Result<AssistantMessage> {
        let span = info_span!("llm.completion", model, messages = messages.len());
        async {
            let url = format!("{}/chat/completions", self.config.llm.base_url.trim_end_matches('/'));
            let request = json!({
                "model": model,
                "messages": messages,
                "tools": [ask_user_tool()],
            });

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.config.llm.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|err| AppError::Stage(format!("completion request failed: {err}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::Stage(format!(
                    "completion API error ({status}): {body}"
                )));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|err| AppError::Stage(format!("malformed completion response: {err}")))?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message)
                .ok_or_else(|| AppError::Stage("completion response has no choices".into()))
        }
        .instrument(span)
        .await
    }
}

impl StageAgent for OpenAiAgent {
    fn run<'a>(
        &'a self,
        kind: AgentKind,
        prompt: String,
        hooks: &'a mut StageHooks<'_>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.run_loop(kind, prompt, hooks))
    }
}

fn assistant_turn(message: &AssistantMessage) -> Value {
    json!({
        "role": "assistant",
        "content": message.content,
        "tool_calls": message.tool_calls().iter().map(|call| json!({
            "id": call.id,
            "type": "function",
            "function": {
                "name": call.function.name,
                "arguments": call.function.arguments,
            },
        })).collect::<Vec<_>>(),
    })
}

fn ask_user_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": ASK_USER_TOOL,
            "description": "Ask the user for clarification about their project and return their answer.",
            "parameters": {
                "type": "object",
                "properties": {
                    "question_for_user": {
                        "type": "string",
                        "description": "The clarification question to ask the user.",
                    },
                },
                "required": ["question_for_user"],
            },
        },
    })
}
