use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    context::Context,
    error::{FlowError, Result},
    session::Session,
    step::{Step, StepAction, StepOutcome},
};

/// Predicate deciding which branch a conditional edge takes.
pub type EdgePredicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

enum Edge {
    Direct {
        from: String,
        to: String,
    },
    Conditional {
        from: String,
        predicate: EdgePredicate,
        yes: String,
        no: String,
    },
}

/// A flow of dialog steps with transitions between them.
///
/// The session's `current_step_id` is the single, explicit state of the
/// conversation; `execute_session` runs exactly that step and applies the
/// transition it returns.
pub struct Flow {
    pub id: String,
    steps: DashMap<String, Arc<dyn Step>>,
    edges: Mutex<Vec<Edge>>,
    start_step_id: Mutex<Option<String>>,
}

impl Flow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: DashMap::new(),
            edges: Mutex::new(Vec::new()),
            start_step_id: Mutex::new(None),
        }
    }

    pub fn add_step(&self, step: Arc<dyn Step>) -> &Self {
        let step_id = step.id().to_string();
        let is_first = self.steps.is_empty();
        self.steps.insert(step_id.clone(), step);
        if is_first {
            *self.start_step_id.lock().unwrap() = Some(step_id);
        }
        self
    }

    pub fn add_edge(&self, from: impl Into<String>, to: impl Into<String>) -> &Self {
        self.edges.lock().unwrap().push(Edge::Direct {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn add_conditional_edge<F>(
        &self,
        from: impl Into<String>,
        predicate: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> &Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.edges.lock().unwrap().push(Edge::Conditional {
            from: from.into(),
            predicate: Arc::new(predicate),
            yes: yes.into(),
            no: no.into(),
        });
        self
    }

    pub fn start_step_id(&self) -> Option<String> {
        self.start_step_id.lock().unwrap().clone()
    }

    /// Execute the session's current step and apply its transition.
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        let outcome = self
            .execute_step(&session.current_step_id, session.context.clone())
            .await?;

        session.status_message = outcome.status.clone();

        match &outcome.action {
            StepAction::Stay => Ok(ExecutionResult {
                reply: outcome.reply,
                status: ExecutionStatus::WaitingForInput,
            }),
            StepAction::Advance => {
                if let Some(next) = self.next_step(&outcome.step_id, &session.context) {
                    session.current_step_id = next;
                }
                Ok(ExecutionResult {
                    reply: outcome.reply,
                    status: ExecutionStatus::WaitingForInput,
                })
            }
            StepAction::AdvanceAndRun => {
                match self.next_step(&outcome.step_id, &session.context) {
                    Some(next) => {
                        session.current_step_id = next;
                        // Same context; the next step sees everything this one stored.
                        Box::pin(self.execute_session(session)).await
                    }
                    None => Ok(ExecutionResult {
                        reply: outcome.reply,
                        status: ExecutionStatus::WaitingForInput,
                    }),
                }
            }
            StepAction::Jump(target) => {
                if !self.steps.contains_key(target) {
                    return Err(FlowError::StepNotFound(target.clone()));
                }
                session.current_step_id = target.clone();
                Ok(ExecutionResult {
                    reply: outcome.reply,
                    status: ExecutionStatus::WaitingForInput,
                })
            }
            StepAction::End => Ok(ExecutionResult {
                reply: outcome.reply,
                status: ExecutionStatus::Completed,
            }),
        }
    }

    async fn execute_step(&self, step_id: &str, context: Context) -> Result<StepOutcome> {
        let step = self
            .steps
            .get(step_id)
            .ok_or_else(|| FlowError::StepNotFound(step_id.to_string()))?
            .clone();

        debug!(step_id, flow_id = %self.id, "executing step");
        let mut outcome = step.run(context).await?;
        outcome.step_id = step_id.to_string();
        Ok(outcome)
    }

    fn next_step(&self, current: &str, context: &Context) -> Option<String> {
        let edges = self.edges.lock().unwrap();
        for edge in edges.iter() {
            match edge {
                Edge::Direct { from, to } if from == current => return Some(to.clone()),
                Edge::Conditional {
                    from,
                    predicate,
                    yes,
                    no,
                } if from == current => {
                    return Some(if predicate(context) {
                        yes.clone()
                    } else {
                        no.clone()
                    });
                }
                _ => {}
            }
        }
        None
    }
}

/// Builder for assembling a [`Flow`].
pub struct FlowBuilder {
    flow: Flow,
}

impl FlowBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            flow: Flow::new(id),
        }
    }

    pub fn add_step(self, step: Arc<dyn Step>) -> Self {
        self.flow.add_step(step);
        self
    }

    pub fn add_edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.flow.add_edge(from, to);
        self
    }

    pub fn add_conditional_edge<F>(
        self,
        from: impl Into<String>,
        predicate: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.flow.add_conditional_edge(from, predicate, yes, no);
        self
    }

    pub fn build(self) -> Flow {
        self.flow
    }
}

/// Result of advancing a session by one step.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub reply: Option<String>,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    WaitingForInput,
    Completed,
}
