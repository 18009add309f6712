use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dialog_flow::{Context, FlowError, Result, Step, StepAction, StepOutcome};
use serde_json::json;
use tracing::{error, info};

use crate::booking::QueueAssigner;
use crate::history::PatientHistoryStore;

use super::types::{AFFIRMATIVES, CLOSING_MESSAGE, step_ids, session_keys};
use super::utils::{collected, user_input};

/// Final state: on an affirmative answer, assign a queue slot and persist the
/// patient profile; anything else ends the conversation politely. Either way
/// the session completes.
pub struct ConfirmBookingStep {
    history: Arc<dyn PatientHistoryStore>,
    queue: Arc<dyn QueueAssigner>,
}

impl ConfirmBookingStep {
    pub fn new(history: Arc<dyn PatientHistoryStore>, queue: Arc<dyn QueueAssigner>) -> Self {
        Self { history, queue }
    }
}

#[async_trait]
impl Step for ConfirmBookingStep {
    fn id(&self) -> &str {
        step_ids::CONFIRM_BOOKING
    }

    async fn run(&self, context: Context) -> Result<StepOutcome> {
        let input = user_input(&context).await?;
        if !AFFIRMATIVES.contains(&input.to_lowercase().as_str()) {
            return Ok(StepOutcome::with_status(
                Some(CLOSING_MESSAGE.to_string()),
                StepAction::End,
                "booking declined",
            ));
        }

        let info = collected(&context).await;
        let specialty = info
            .primary_specialty()
            .ok_or_else(|| FlowError::Context("predicted specialties missing".to_string()))?
            .to_string();
        let patient_id: String = context
            .get(session_keys::PATIENT_ID)
            .await
            .ok_or_else(|| FlowError::Context("patient_id not found".to_string()))?;

        let queue_number = self.queue.assign(&specialty);

        let profile = json!({
            "patient_id": patient_id,
            "info": info,
            "queue_number": queue_number,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self
            .history
            .record(&patient_id, "conversation", profile)
            .await
        {
            error!(error = %e, patient_id, "failed to persist patient profile");
            return Err(FlowError::StepFailed(e.to_string()));
        }

        info!(patient_id, specialty, queue_number, "booking confirmed");

        let reply = format!(
            "Đã đặt lịch khám thành công!\n- Khoa: {specialty}\n- Số thứ tự: {queue_number}\n\n\
             Xin vui lòng đến đúng khoa để được khám. Cảm ơn bạn đã sử dụng dịch vụ!"
        );

        Ok(StepOutcome::with_status(
            Some(reply),
            StepAction::End,
            "booking confirmed",
        ))
    }
}
