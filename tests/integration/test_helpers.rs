//! Shared helpers for session-level integration tests.
//!
//! Provides a scripted [`StageAgent`], task-directory setup, `AppState`
//! construction and a client driver that answers clarification requests
//! from a fixed list, so individual test modules can focus on behaviour.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use specwright::agent::{BoxFuture, StageAgent, ASK_USER_TOOL};
use specwright::config::GlobalConfig;
use specwright::models::event::OutboundEvent;
use specwright::models::stage::{AgentKind, StageSelector};
use specwright::persistence::DocumentStore;
use specwright::session::coordinator::{run_session, SessionReport};
use specwright::session::runner::StageHooks;
use specwright::session::AppState;
use specwright::transport::memory::{memory_connection, ClientFrame, MemoryClient};
use specwright::{AppError, Result};

/// Task name used by most tests.
pub const TASK: &str = "churn";

/// Upper bound for a whole session in tests.
pub const SESSION_DEADLINE: Duration = Duration::from_secs(10);

/// One scripted agent action.
#[derive(Debug, Clone)]
pub enum Step {
    /// Publish progress text.
    Progress(String),
    /// Ask the operator a question through the clarification tool.
    Ask(String),
    /// Sleep before the next step.
    Pause(Duration),
    /// Fail the stage.
    Fail(String),
    /// Never finish.
    Hang,
}

type Answer = Arc<dyn Fn(&[String]) -> Value + Send + Sync>;

/// Behaviour of one agent kind.
#[derive(Clone)]
pub struct Script {
    steps: Vec<Step>,
    answer: Answer,
}

impl Script {
    /// A script that runs `steps` and then answers with `answer(replies)`.
    pub fn new(steps: Vec<Step>, answer: impl Fn(&[String]) -> Value + Send + Sync + 'static) -> Self {
        Self {
            steps,
            answer: Arc::new(answer),
        }
    }

    /// A script that answers `value` immediately.
    pub fn answer(value: Value) -> Self {
        Self::new(Vec::new(), move |_| value.clone())
    }
}

/// Stub agent backend driven by per-kind scripts.
#[derive(Default)]
pub struct ScriptedAgent {
    scripts: HashMap<AgentKind, Script>,
    calls: Mutex<Vec<(AgentKind, String)>>,
}

impl ScriptedAgent {
    /// Empty agent; every kind without a script fails its stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the script for `kind`.
    #[must_use]
    pub fn with(mut self, kind: AgentKind, script: Script) -> Self {
        self.scripts.insert(kind, script);
        self
    }

    /// Every `(kind, prompt)` the agent was run with, in order.
    pub fn calls(&self) -> Vec<(AgentKind, String)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl StageAgent for ScriptedAgent {
    fn run<'a>(
        &'a self,
        kind: AgentKind,
        prompt: String,
        hooks: &'a mut StageHooks<'_>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.calls.lock().expect("calls lock").push((kind, prompt));
            let script = self
                .scripts
                .get(&kind)
                .ok_or_else(|| AppError::Stage(format!("no script for {kind:?}")))?;

            let mut replies = Vec::new();
            for (n, step) in script.steps.iter().enumerate() {
                match step {
                    Step::Progress(text) => hooks.progress(text.clone()),
                    Step::Ask(question) => {
                        hooks.tool_invoked(
                            ASK_USER_TOOL,
                            json!({ "question_for_user": question }),
                            &format!("call_{n}"),
                        );
                        replies.push(hooks.ask_user(question).await?);
                    }
                    Step::Pause(duration) => tokio::time::sleep(*duration).await,
                    Step::Fail(message) => return Err(AppError::Stage(message.clone())),
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
            Ok((script.answer)(&replies).to_string())
        })
    }
}

/// Build a `GlobalConfig` rooted at `task_dir` with optional extra TOML.
pub fn test_config(task_dir: &Path, extra: &str) -> GlobalConfig {
    let toml = format!(
        "task_dir = '{root}'\ndefault_task = \"{TASK}\"\n{extra}\n",
        root = task_dir.to_str().expect("utf8 path").replace('\\', "\\\\"),
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Build shared state around `agent`.
pub fn test_state(config: GlobalConfig, agent: Arc<ScriptedAgent>) -> Arc<AppState> {
    let store = DocumentStore::new(config.task_dir.clone());
    Arc::new(AppState {
        config: Arc::new(config),
        store,
        agent,
    })
}

/// Write the operator input document for `task`.
pub fn write_input(task_dir: &Path, task: &str, doc: &Value) {
    let dir = task_dir.join(task);
    std::fs::create_dir_all(&dir).expect("create task dir");
    std::fs::write(
        dir.join("task_specs.json"),
        serde_json::to_vec_pretty(doc).expect("serialise input"),
    )
    .expect("write input");
}

/// Read the processed document for `task`, if it exists.
pub fn read_processed(task_dir: &Path, task: &str) -> Option<Value> {
    let path = task_dir.join(task).join("task_specs_processed.json");
    let raw = std::fs::read_to_string(path).ok()?;
    Some(serde_json::from_str(&raw).expect("processed document is JSON"))
}

/// The churn document used throughout the scenarios.
pub fn churn_input() -> Value {
    json!({
        "overview": "predict churn",
        "target": { "field_name": "churned" },
        "features": { "age": "customer age" }
    })
}

/// Feasibility answer for the churn scenario.
pub fn churn_feasibility(rationale: &str) -> Value {
    json!({
        "refined_overview": "Predict whether a customer churns within the next period.",
        "is_feasible": true,
        "task_type": "Classification",
        "target_description": "1 if the customer churned, else 0",
        "decision_rationale": rationale,
    })
}

/// Start a session on an in-memory connection.
pub fn start_session(
    state: &Arc<AppState>,
    selector: StageSelector,
) -> (JoinHandle<SessionReport>, MemoryClient) {
    let (source, sink, client) = memory_connection();
    let handle = tokio::spawn(run_session(
        Arc::clone(state),
        selector,
        TASK.to_owned(),
        source,
        sink,
    ));
    (handle, client)
}

/// Wait for the session to finish.
pub async fn finish(handle: JoinHandle<SessionReport>) -> SessionReport {
    tokio::time::timeout(SESSION_DEADLINE, handle)
        .await
        .expect("session finishes in time")
        .expect("session task does not panic")
}

/// Answer each clarification request with the next entry of `answers` and
/// collect every event until the server closes the connection.
pub async fn converse(client: &mut MemoryClient, answers: &[&str]) -> Vec<OutboundEvent> {
    let mut answers: VecDeque<&str> = answers.iter().copied().collect();
    let mut events = Vec::new();
    loop {
        let frame = tokio::time::timeout(SESSION_DEADLINE, client.next_frame())
            .await
            .expect("frame arrives in time");
        match frame {
            Some(ClientFrame::Event(event)) => {
                if matches!(event, OutboundEvent::UserInputRequest { .. }) {
                    let answer = answers.pop_front().expect("an answer for every request");
                    assert!(client.send_text(answer), "client can still send");
                }
                events.push(event);
            }
            Some(ClientFrame::Closed) | None => return events,
        }
    }
}

/// Event kinds, for order assertions.
pub fn kinds(events: &[OutboundEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            OutboundEvent::AgentStart { .. } => "agent-start",
            OutboundEvent::Progress { .. } => "progress",
            OutboundEvent::ToolCall { .. } => "tool-call",
            OutboundEvent::UserInputRequest { .. } => "user-input-request",
            OutboundEvent::EndOfStage { .. } => "end-of-stage",
            OutboundEvent::Error { .. } => "error",
            OutboundEvent::End => "end",
        })
        .collect()
}
