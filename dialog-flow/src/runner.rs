//! FlowRunner – loads a session, executes exactly one step, and persists the
//! updated session back to its store.
//!
//! This is the load → execute → save pattern interactive services want: one
//! step per request, the reply goes back to the client, and the session is
//! saved for the next roundtrip. Use [`Flow::execute_session`] directly when
//! you need custom persistence logic.

use std::sync::Arc;

use crate::{
    error::{FlowError, Result},
    flow::{ExecutionResult, Flow},
    session::SessionStore,
};

#[derive(Clone)]
pub struct FlowRunner {
    flow: Arc<Flow>,
    store: Arc<dyn SessionStore>,
}

impl FlowRunner {
    pub fn new(flow: Arc<Flow>, store: Arc<dyn SessionStore>) -> Self {
        Self { flow, store }
    }

    /// Execute exactly one step for `session_id` and persist the result.
    pub async fn run(&self, session_id: &str) -> Result<ExecutionResult> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?;

        let result = self.flow.execute_session(&mut session).await?;

        self.store.save(session).await?;

        Ok(result)
    }
}
