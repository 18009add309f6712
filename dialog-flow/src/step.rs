use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{context::Context, error::Result};

/// What a step produced for this turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Reply to send back to the user, if any.
    pub reply: Option<String>,
    /// How the flow should move on.
    pub action: StepAction,
    /// Short operator-facing status, surfaced on the session.
    pub status: Option<String>,
    /// Filled in by the flow after execution.
    #[serde(default)]
    pub step_id: String,
}

impl StepOutcome {
    pub fn new(reply: Option<String>, action: StepAction) -> Self {
        Self {
            reply,
            action,
            status: None,
            step_id: String::new(),
        }
    }

    pub fn with_status(
        reply: Option<String>,
        action: StepAction,
        status: impl Into<String>,
    ) -> Self {
        Self {
            reply,
            action,
            status: Some(status.into()),
            step_id: String::new(),
        }
    }
}

/// Transition decision after a step ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepAction {
    /// Stay on the current step and wait for new input (re-prompt).
    Stay,
    /// Move to the next step along the edges, then wait for input.
    Advance,
    /// Move to the next step and execute it immediately with the same context.
    AdvanceAndRun,
    /// Move to a specific step by id, then wait for input.
    Jump(String),
    /// The conversation is finished.
    End,
}

/// One state of the dialog. Implementations read the pending user input from
/// the context, validate it, mutate the collected data and decide the
/// transition.
#[async_trait]
pub trait Step: Send + Sync {
    /// Unique identifier, used as the session's explicit state.
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<StepOutcome>;
}
