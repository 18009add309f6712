use async_trait::async_trait;
use dialog_flow::{Context, Result, Step, StepAction, StepOutcome};
use tracing::info;

use super::types::{PROMPT_SYMPTOMS, REPROMPT_NON_EMPTY, step_ids};
use super::utils::{collected, store_collected, user_input};

/// Collects a phone number or email. Free text, only required to be
/// non-empty.
pub struct CollectContactStep;

#[async_trait]
impl Step for CollectContactStep {
    fn id(&self) -> &str {
        step_ids::COLLECT_CONTACT
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
        info.contact = Some(input);
        store_collected(&context, &info).await;
        info!("collected patient contact");

        Ok(StepOutcome::with_status(
            Some(PROMPT_SYMPTOMS.to_string()),
            StepAction::Advance,
            "contact collected, asking for symptoms",
        ))
    }
}
