use std::sync::Arc;

use async_trait::async_trait;
use dialog_flow::{Context, Result, Step, StepAction, StepOutcome};
use tracing::{error, info};

use crate::classifier::SpecialtyClassifier;

use super::types::{GENERIC_FAILURE, PROMPT_HISTORY, REPROMPT_NON_EMPTY, step_ids};
use super::utils::{collected, store_collected, user_input};

/// Upper bound on stored specialty suggestions; the classifier caps it
/// further at the number of known specialties.
const TOP_K: usize = 3;

/// Collects the symptom description and runs the specialty classifier on it.
///
/// Predictions are stored exactly once, here, before any history is
/// collected. A classifier failure keeps the session on this step with
/// nothing stored, so the patient can simply retry.
pub struct CollectSymptomsStep {
    classifier: Arc<dyn SpecialtyClassifier>,
}

impl CollectSymptomsStep {
    pub fn new(classifier: Arc<dyn SpecialtyClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Step for CollectSymptomsStep {
    fn id(&self) -> &str {
        step_ids::COLLECT_SYMPTOMS
    }

    async fn run(&self, context: Context) -> Result<StepOutcome> {
        let input = user_input(&context).await?;
        if input.is_empty() {
            return Ok(StepOutcome::new(
                Some(REPROMPT_NON_EMPTY.to_string()),
                StepAction::Stay,
            ));
        }

        let predictions = match self.classifier.predict(&input, TOP_K) {
            Ok(predictions) => predictions,
            Err(e) => {
                // Full detail for operators, generic apology for the patient.
                error!(error = %e, "specialty prediction failed");
                return Ok(StepOutcome::with_status(
                    Some(GENERIC_FAILURE.to_string()),
                    StepAction::Stay,
                    "classifier failure, awaiting retry",
                ));
            }
        };

        info!(
            top = ?predictions.first().map(|p| p.specialty.clone()),
            count = predictions.len(),
            "specialties predicted"
        );

        let mut info = collected(&context).await;
        info.symptoms = Some(input);
        info.predicted_specialties = Some(predictions);
        store_collected(&context, &info).await;

        Ok(StepOutcome::with_status(
            Some(PROMPT_HISTORY.to_string()),
            StepAction::Advance,
            "symptoms collected, asking for medical history",
        ))
    }
}
