use std::sync::Arc;

use async_trait::async_trait;
use dialog_flow::{Context, FlowError, Result, Step, StepAction, StepOutcome};
use tracing::info;

use crate::treatment::{MedicalHistory, TreatmentEngine, split_symptoms};

use super::types::{REPROMPT_NON_EMPTY, step_ids};
use super::utils::{collected, store_collected, user_input};

/// Collects the medical history, runs the rule-based treatment engine over
/// the split symptom tokens and proposes the predicted specialty together
/// with the booking question.
pub struct CollectHistoryStep {
    engine: Arc<TreatmentEngine>,
}

impl CollectHistoryStep {
    pub fn new(engine: Arc<TreatmentEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Step for CollectHistoryStep {
    fn id(&self) -> &str {
        step_ids::COLLECT_HISTORY
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
        let symptoms = info
            .symptoms
            .as_deref()
            .ok_or_else(|| FlowError::Context("symptoms not collected yet".to_string()))?;

        let history = MedicalHistory {
            description: Some(input.clone()),
            ..Default::default()
        };
        let recommendations = self.engine.recommend(&split_symptoms(symptoms), Some(&history));
        info!(
            matched_specialties = recommendations.specialties.len(),
            "treatment recommendations computed"
        );

        let primary = info
            .primary_specialty()
            .ok_or_else(|| FlowError::Context("predicted specialties missing".to_string()))?
            .to_string();

        info.medical_history = Some(input);
        info.recommendations = Some(recommendations);
        store_collected(&context, &info).await;

        let reply = format!(
            "Dựa trên thông tin bạn cung cấp, tôi đề xuất bạn nên khám tại khoa {primary}. \
             Bạn có muốn đặt lịch khám không? (Có/Không)"
        );

        Ok(StepOutcome::with_status(
            Some(reply),
            StepAction::Advance,
            "history collected, awaiting booking decision",
        ))
    }
}
