pub mod context;
pub mod error;
pub mod flow;
pub mod runner;
pub mod session;
pub mod step;

pub use context::{ChatRole, ChatTurn, Context};
pub use error::{FlowError, Result};
pub use flow::{ExecutionResult, ExecutionStatus, Flow, FlowBuilder};
pub use runner::FlowRunner;
pub use session::{InMemorySessionStore, PostgresSessionStore, Session, SessionStore};
pub use step::{Step, StepAction, StepOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoStep {
        id: String,
    }

    #[async_trait]
    impl Step for EchoStep {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, context: Context) -> Result<StepOutcome> {
            let input: String = context.get("input").await.unwrap_or_default();
            context.set("output", format!("seen: {input}")).await;
            Ok(StepOutcome::new(
                Some("done".to_string()),
                StepAction::End,
            ))
        }
    }

    struct ValidatingStep;

    #[async_trait]
    impl Step for ValidatingStep {
        fn id(&self) -> &str {
            "validating"
        }

        async fn run(&self, context: Context) -> Result<StepOutcome> {
            let input: String = context.get("input").await.unwrap_or_default();
            if input.trim().parse::<u32>().is_ok() {
                Ok(StepOutcome::new(Some("ok".into()), StepAction::Advance))
            } else {
                Ok(StepOutcome::new(
                    Some("số, xin thử lại".into()),
                    StepAction::Stay,
                ))
            }
        }
    }

    #[tokio::test]
    async fn single_step_flow_runs_and_completes() {
        let step = Arc::new(EchoStep { id: "echo".into() });
        let flow = FlowBuilder::new("test").add_step(step).build();

        let mut session = Session::new_from_step("s1".into(), "echo");
        session.context.set("input", "hello").await;

        let result = flow.execute_session(&mut session).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(
            session.context.get::<String>("output").await.as_deref(),
            Some("seen: hello")
        );
    }

    #[tokio::test]
    async fn invalid_input_stays_on_current_step() {
        let flow = FlowBuilder::new("test")
            .add_step(Arc::new(ValidatingStep))
            .add_step(Arc::new(EchoStep { id: "echo".into() }))
            .add_edge("validating", "echo")
            .build();

        let mut session = Session::new_from_step("s1".into(), "validating");
        session.context.set("input", "ba mươi").await;

        let result = flow.execute_session(&mut session).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::WaitingForInput);
        assert_eq!(session.current_step_id, "validating");

        session.context.set("input", "30").await;
        flow.execute_session(&mut session).await.unwrap();
        assert_eq!(session.current_step_id, "echo");
    }

    #[tokio::test]
    async fn conditional_edge_picks_branch() {
        struct RouterStep;
        #[async_trait]
        impl Step for RouterStep {
            fn id(&self) -> &str {
                "router"
            }
            async fn run(&self, _context: Context) -> Result<StepOutcome> {
                Ok(StepOutcome::new(None, StepAction::Advance))
            }
        }

        let flow = FlowBuilder::new("test")
            .add_step(Arc::new(RouterStep))
            .add_step(Arc::new(EchoStep { id: "yes".into() }))
            .add_step(Arc::new(EchoStep { id: "no".into() }))
            .add_conditional_edge(
                "router",
                |ctx| ctx.get_sync::<bool>("flag").unwrap_or(false),
                "yes",
                "no",
            )
            .build();

        let mut session = Session::new_from_step("s1".into(), "router");
        session.context.set("flag", true).await;
        flow.execute_session(&mut session).await.unwrap();
        assert_eq!(session.current_step_id, "yes");
    }

    #[tokio::test]
    async fn advance_and_run_executes_the_next_step_in_the_same_turn() {
        struct HandoffStep;
        #[async_trait]
        impl Step for HandoffStep {
            fn id(&self) -> &str {
                "handoff"
            }
            async fn run(&self, context: Context) -> Result<StepOutcome> {
                context.set("input", "from handoff").await;
                Ok(StepOutcome::new(None, StepAction::AdvanceAndRun))
            }
        }

        let flow = FlowBuilder::new("test")
            .add_step(Arc::new(HandoffStep))
            .add_step(Arc::new(EchoStep { id: "echo".into() }))
            .add_edge("handoff", "echo")
            .build();

        let mut session = Session::new_from_step("s1".into(), "handoff");
        let result = flow.execute_session(&mut session).await.unwrap();

        // The echo step ran on the same context without a second turn.
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(session.current_step_id, "echo");
        assert_eq!(
            session.context.get::<String>("output").await.as_deref(),
            Some("seen: from handoff")
        );
    }

    #[tokio::test]
    async fn jump_moves_to_the_named_step_and_rejects_unknown_targets() {
        struct JumpStep {
            target: String,
        }
        #[async_trait]
        impl Step for JumpStep {
            fn id(&self) -> &str {
                "jumper"
            }
            async fn run(&self, _context: Context) -> Result<StepOutcome> {
                Ok(StepOutcome::new(
                    None,
                    StepAction::Jump(self.target.clone()),
                ))
            }
        }

        let flow = FlowBuilder::new("test")
            .add_step(Arc::new(JumpStep {
                target: "echo".into(),
            }))
            .add_step(Arc::new(EchoStep { id: "echo".into() }))
            .build();

        let mut session = Session::new_from_step("s1".into(), "jumper");
        let result = flow.execute_session(&mut session).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::WaitingForInput);
        assert_eq!(session.current_step_id, "echo");

        let flow = FlowBuilder::new("test")
            .add_step(Arc::new(JumpStep {
                target: "missing".into(),
            }))
            .build();
        let mut session = Session::new_from_step("s2".into(), "jumper");
        let err = flow.execute_session(&mut session).await.unwrap_err();
        assert!(matches!(err, FlowError::StepNotFound(_)));
    }

    #[tokio::test]
    async fn runner_persists_session_between_turns() {
        let flow = Arc::new(
            FlowBuilder::new("test")
                .add_step(Arc::new(ValidatingStep))
                .add_step(Arc::new(EchoStep { id: "echo".into() }))
                .add_edge("validating", "echo")
                .build(),
        );
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let session = Session::new_from_step("s1".into(), "validating");
        session.context.set("input", "21").await;
        store.save(session).await.unwrap();

        let runner = FlowRunner::new(flow, store.clone());
        runner.run("s1").await.unwrap();

        let saved = store.get("s1").await.unwrap().unwrap();
        assert_eq!(saved.current_step_id, "echo");
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let flow = Arc::new(FlowBuilder::new("test").add_step(Arc::new(ValidatingStep)).build());
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let runner = FlowRunner::new(flow, store);
        let err = runner.run("nope").await.unwrap_err();
        assert!(matches!(err, FlowError::SessionNotFound(_)));
    }
}
