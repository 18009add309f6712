use async_trait::async_trait;
use dialog_flow::{Context, Result, Step, StepAction, StepOutcome};
use tracing::info;

use super::types::{PROMPT_GENDER, REPROMPT_AGE, step_ids};
use super::utils::{collected, store_collected, user_input};

/// Collects the patient's age. Anything that does not parse as an integer is
/// rejected with a re-prompt; the session stays on this step.
pub struct CollectAgeStep;

#[async_trait]
impl Step for CollectAgeStep {
    fn id(&self) -> &str {
        step_ids::COLLECT_AGE
    }

    async fn run(&self, context: Context) -> Result<StepOutcome> {
        let input = user_input(&context).await?;
        let Ok(age) = input.parse::<u32>() else {
            return Ok(StepOutcome::new(
                Some(REPROMPT_AGE.to_string()),
                StepAction::Stay,
            ));
        };

        let mut info = collected(&context).await;
        info.age = Some(age);
        store_collected(&context, &info).await;
        info!(age, "collected patient age");

        Ok(StepOutcome::with_status(
            Some(PROMPT_GENDER.to_string()),
            StepAction::Advance,
            "age collected, asking for gender",
        ))
    }
}
