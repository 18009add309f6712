// Scripted intake conversation, one step per collection state.
pub mod collect_age;
pub mod collect_contact;
pub mod collect_gender;
pub mod collect_history;
pub mod collect_name;
pub mod collect_symptoms;
pub mod confirm_booking;

pub mod types;
mod utils;

pub use collect_age::CollectAgeStep;
pub use collect_contact::CollectContactStep;
pub use collect_gender::CollectGenderStep;
pub use collect_history::CollectHistoryStep;
pub use collect_name::CollectNameStep;
pub use collect_symptoms::CollectSymptomsStep;
pub use confirm_booking::ConfirmBookingStep;

pub use types::{CollectedInfo, session_keys, step_ids};

use std::sync::Arc;

use dialog_flow::{Flow, FlowBuilder};

use crate::booking::QueueAssigner;
use crate::classifier::SpecialtyClassifier;
use crate::history::PatientHistoryStore;
use crate::treatment::TreatmentEngine;

/// Assemble the linear intake flow. The session's current step id is the
/// conversation state; there is no branching besides input validity.
pub fn build_intake_flow(
    classifier: Arc<dyn SpecialtyClassifier>,
    engine: Arc<TreatmentEngine>,
    history: Arc<dyn PatientHistoryStore>,
    queue: Arc<dyn QueueAssigner>,
) -> Flow {
    FlowBuilder::new("medical_intake")
        .add_step(Arc::new(CollectNameStep))
        .add_step(Arc::new(CollectAgeStep))
        .add_step(Arc::new(CollectGenderStep))
        .add_step(Arc::new(CollectContactStep))
        .add_step(Arc::new(CollectSymptomsStep::new(classifier)))
        .add_step(Arc::new(CollectHistoryStep::new(engine)))
        .add_step(Arc::new(ConfirmBookingStep::new(history, queue)))
        .add_edge(step_ids::COLLECT_NAME, step_ids::COLLECT_AGE)
        .add_edge(step_ids::COLLECT_AGE, step_ids::COLLECT_GENDER)
        .add_edge(step_ids::COLLECT_GENDER, step_ids::COLLECT_CONTACT)
        .add_edge(step_ids::COLLECT_CONTACT, step_ids::COLLECT_SYMPTOMS)
        .add_edge(step_ids::COLLECT_SYMPTOMS, step_ids::COLLECT_HISTORY)
        .add_edge(step_ids::COLLECT_HISTORY, step_ids::CONFIRM_BOOKING)
        .build()
}
