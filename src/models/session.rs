//! Session lifecycle state machine.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{AppError, Result};

/// Lifecycle state of one client session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SessionState {
    /// Loading the document and starting background tasks.
    Initializing,
    /// Running the stage at `stage` (0-based position in this session).
    Running {
        /// Stage position.
        stage: usize,
    },
    /// The running stage is suspended on a clarification reply.
    AwaitingUserInput {
        /// Stage position.
        stage: usize,
    },
    /// All stages merged; draining and closing the connection.
    Finalizing,
    /// Terminal success.
    Completed,
    /// Terminal failure (stage, persistence, or protocol error).
    Failed,
    /// Terminal: the client went away.
    Disconnected,
    /// Terminal: the client asked to cancel.
    Cancelled,
    /// Terminal: a stage or clarification deadline elapsed.
    TimedOut,
}

impl SessionState {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Disconnected | Self::Cancelled | Self::TimedOut
        )
    }

    /// Terminal state an error drives the session into.
    #[must_use]
    pub fn for_error(err: &AppError) -> Self {
        match err {
            AppError::Disconnected | AppError::Transport(_) => Self::Disconnected,
            AppError::Cancelled => Self::Cancelled,
            AppError::Timeout(_) => Self::TimedOut,
            _ => Self::Failed,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (
                _,
                Self::Failed | Self::Disconnected | Self::Cancelled | Self::TimedOut,
            ) => true,
            (Self::Initializing, Self::Running { stage }) => stage == 0,
            (Self::Running { stage: current }, Self::Running { stage }) => stage == current + 1,
            (Self::Running { stage: current }, Self::AwaitingUserInput { stage })
            | (Self::AwaitingUserInput { stage: current }, Self::Running { stage }) => {
                stage == current
            }
            (Self::Initializing | Self::Running { .. }, Self::Finalizing)
            | (Self::Finalizing, Self::Completed) => true,
            _ => false,
        }
    }
}

/// Tracks the current state of a session and the path it took.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    session_id: String,
    state: SessionState,
    history: Vec<SessionState>,
}

impl SessionLifecycle {
    /// Start a lifecycle in [`SessionState::Initializing`].
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Initializing,
            history: vec![SessionState::Initializing],
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, in order.
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the transition is not permitted.
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            error!(
                session_id = %self.session_id,
                from = ?self.state,
                to = ?next,
                "rejected session transition"
            );
            return Err(AppError::Conflict(format!(
                "invalid session transition {:?} -> {next:?}",
                self.state
            )));
        }
        debug!(session_id = %self.session_id, from = ?self.state, to = ?next, "session transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}
