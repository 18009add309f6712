use async_trait::async_trait;
use dialog_flow::{Context, Result, Step, StepAction, StepOutcome};
use tracing::info;

use super::types::{ACCEPTED_GENDERS, PROMPT_CONTACT, REPROMPT_GENDER, step_ids};
use super::utils::{collected, store_collected, user_input};

/// Collects gender, constrained to Nam/Nữ/Khác (case-insensitive). The
/// patient's original spelling is what gets stored.
pub struct CollectGenderStep;

#[async_trait]
impl Step for CollectGenderStep {
    fn id(&self) -> &str {
        step_ids::COLLECT_GENDER
    }

    async fn run(&self, context: Context) -> Result<StepOutcome> {
        let input = user_input(&context).await?;
        let lowered = input.to_lowercase();
        if !ACCEPTED_GENDERS.contains(&lowered.as_str()) {
            return Ok(StepOutcome::new(
                Some(REPROMPT_GENDER.to_string()),
                StepAction::Stay,
            ));
        }

        let mut info = collected(&context).await;
        info.gender = Some(input);
        store_collected(&context, &info).await;
        info!("collected patient gender");

        Ok(StepOutcome::with_status(
            Some(PROMPT_CONTACT.to_string()),
            StepAction::Advance,
            "gender collected, asking for contact",
        ))
    }
}
