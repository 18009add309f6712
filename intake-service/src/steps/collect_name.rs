use async_trait::async_trait;
use dialog_flow::{Context, Result, Step, StepAction, StepOutcome};
use tracing::info;

use super::types::{PROMPT_AGE, REPROMPT_NON_EMPTY, step_ids};
use super::utils::{collected, store_collected, user_input};

/// First collection state: the patient's full name. Any non-empty text is
/// accepted.
pub struct CollectNameStep;

#[async_trait]
impl Step for CollectNameStep {
    fn id(&self) -> &str {
        step_ids::COLLECT_NAME
    }

    async fn run(&self, context: Context) -> Result<StepOutcome> {
        let input = user_input(&context).await?;
        if input.is_empty() {
            return Ok(StepOutcome::new(
                Some(REPROMPT_NON_EMPTY.to_string()),
                StepAction::Stay,
            ));
        }

        let mut info = collected(&context).await;
        info.name = Some(input);
        store_collected(&context, &info).await;
        info!("collected patient name");

        Ok(StepOutcome::with_status(
            Some(PROMPT_AGE.to_string()),
            StepAction::Advance,
            "name collected, asking for age",
        ))
    }
}
