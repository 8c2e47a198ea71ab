//! Stage agents.
//!
//! A [`StageAgent`] turns a stage prompt into a final answer (a JSON object
//! encoded as text). It may ask the operator questions and report tool use
//! through the [`StageHooks`] it is handed; it never touches the connection
//! or the task document directly.

pub mod openai;
pub mod prompts;

pub use crate::transport::BoxFuture;

use crate::models::stage::AgentKind;
use crate::session::runner::StageHooks;
use crate::Result;

/// Name of the clarification tool exposed to every agent.
pub const ASK_USER_TOOL: &str = "ask_user_a_question";

/// Backend that executes one agent run.
pub trait StageAgent: Send + Sync {
    /// Run the agent `kind` on `prompt` and return its final answer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stage` for agent failures, or whatever
    /// [`StageHooks::ask_user`] returned (disconnect, cancel, timeout).
    fn run<'a>(
        &'a self,
        kind: AgentKind,
        prompt: String,
        hooks: &'a mut StageHooks<'_>,
    ) -> BoxFuture<'a, Result<String>>;
}
