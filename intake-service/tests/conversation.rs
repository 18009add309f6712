//! Drives a complete intake conversation through the flow, from name
//! collection to a confirmed booking.

use std::sync::Arc;

use dialog_flow::{ExecutionStatus, Session};
use intake_service::booking::{QueueAssigner, QueueStatus};
use intake_service::classifier::SpecialtyClassifier;
use intake_service::history::{InMemoryPatientHistory, PatientHistoryStore};
use intake_service::steps::{CollectedInfo, build_intake_flow, session_keys, step_ids};
use intake_service::treatment::TreatmentEngine;
use triage_model::SpecialtyPrediction;

struct ScriptedClassifier;

impl SpecialtyClassifier for ScriptedClassifier {
    fn predict(&self, _text: &str, top_k: usize) -> anyhow::Result<Vec<SpecialtyPrediction>> {
        let mut preds = vec![
            SpecialtyPrediction {
                specialty: "Nội khoa".to_string(),
                confidence: 0.65,
            },
            SpecialtyPrediction {
                specialty: "Thần kinh".to_string(),
                confidence: 0.25,
            },
            SpecialtyPrediction {
                specialty: "Tai mũi họng".to_string(),
                confidence: 0.10,
            },
        ];
        preds.truncate(top_k);
        Ok(preds)
    }
}

struct FixedQueue;

impl QueueAssigner for FixedQueue {
    fn assign(&self, _specialty: &str) -> u32 {
        7
    }

    fn status(&self, specialty: &str) -> QueueStatus {
        QueueStatus {
            specialty: specialty.to_string(),
            current_number: 7,
            waiting_minutes: 15,
        }
    }
}

fn write_knowledge_base() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("intake-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("knowledge_base.json");
    let rows = serde_json::json!([
        {
            "disease": "Cảm cúm",
            "specialty": "Nội khoa",
            "symptoms": ["đau", "đầu", "sốt"],
            "medications": ["Paracetamol", "Vitamin C"],
            "tests": ["Công thức máu"]
        },
        {
            "disease": "Viêm xoang",
            "specialty": "Tai mũi họng",
            "symptoms": ["đau", "nghẹt mũi"],
            "medications": ["Xịt mũi"],
            "tests": ["Chụp X-quang xoang"]
        }
    ]);
    std::fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn full_conversation_reaches_a_confirmed_booking() {
    let history = Arc::new(InMemoryPatientHistory::new());
    let engine = TreatmentEngine::load(write_knowledge_base()).unwrap();
    let flow = build_intake_flow(
        Arc::new(ScriptedClassifier),
        Arc::new(engine),
        history.clone(),
        Arc::new(FixedQueue),
    );

    let mut session = Session::new_from_step("e2e-session".to_string(), step_ids::COLLECT_NAME);
    session
        .context
        .set(session_keys::PATIENT_ID, "P20260828")
        .await;

    let script = [
        "Nguyễn Văn A",
        "30",
        "Nam",
        "0123456789",
        "Đau đầu, sốt nhẹ",
        "Không có bệnh nền",
        "Có",
    ];

    let mut last_status = ExecutionStatus::WaitingForInput;
    for turn in script {
        session.context.set(session_keys::USER_INPUT, turn).await;
        let result = flow.execute_session(&mut session).await.unwrap();
        assert!(result.reply.is_some(), "every turn produces a reply");
        last_status = result.status;
    }
    assert_eq!(last_status, ExecutionStatus::Completed);

    let info: CollectedInfo = session
        .context
        .get(session_keys::COLLECTED_INFO)
        .await
        .unwrap();
    assert_eq!(info.name.as_deref(), Some("Nguyễn Văn A"));
    assert_eq!(info.age, Some(30));
    assert_eq!(info.gender.as_deref(), Some("Nam"));
    assert_eq!(info.contact.as_deref(), Some("0123456789"));
    assert_eq!(info.symptoms.as_deref(), Some("Đau đầu, sốt nhẹ"));
    assert_eq!(info.medical_history.as_deref(), Some("Không có bệnh nền"));

    let preds = info.predicted_specialties.as_deref().unwrap();
    assert_eq!(preds.len(), 3);
    assert!(preds.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    assert_eq!(preds[0].specialty, "Nội khoa");

    // "đau đầu sốt nhẹ" → Cảm cúm overlap 3/4 = 0.75 > 0.7, primary match.
    let recs = info.recommendations.as_ref().unwrap();
    assert!(recs.specialties.contains(&"Nội khoa".to_string()));
    assert!(recs.primary_treatments.contains(&"Paracetamol".to_string()));
    assert!(!recs.recommended_tests.is_empty());

    // The confirmed booking was written to the patient's record.
    let records = history.history("P20260828").await.unwrap();
    let conversations = records.get("conversation").unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["queue_number"], 7);
    assert_eq!(conversations[0]["patient_id"], "P20260828");
}

#[tokio::test]
async fn declining_the_booking_completes_without_a_record() {
    let history = Arc::new(InMemoryPatientHistory::new());
    let engine = TreatmentEngine::load(write_knowledge_base()).unwrap();
    let flow = build_intake_flow(
        Arc::new(ScriptedClassifier),
        Arc::new(engine),
        history.clone(),
        Arc::new(FixedQueue),
    );

    let mut session = Session::new_from_step("decline".to_string(), step_ids::COLLECT_NAME);
    session.context.set(session_keys::PATIENT_ID, "P1").await;

    for turn in [
        "Trần Thị B",
        "45",
        "Nữ",
        "tran.b@example.com",
        "Sốt nhẹ",
        "Tiểu đường",
        "Không",
    ] {
        session.context.set(session_keys::USER_INPUT, turn).await;
        let result = flow.execute_session(&mut session).await.unwrap();
        if turn == "Không" {
            assert_eq!(result.status, ExecutionStatus::Completed);
        }
    }

    assert!(history.history("P1").await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_turns_keep_the_session_on_the_same_step() {
    let history = Arc::new(InMemoryPatientHistory::new());
    let engine = TreatmentEngine::load(write_knowledge_base()).unwrap();
    let flow = build_intake_flow(
        Arc::new(ScriptedClassifier),
        Arc::new(engine),
        history,
        Arc::new(FixedQueue),
    );

    let mut session = Session::new_from_step("retry".to_string(), step_ids::COLLECT_NAME);
    session.context.set(session_keys::PATIENT_ID, "P2").await;

    session.context.set(session_keys::USER_INPUT, "An").await;
    flow.execute_session(&mut session).await.unwrap();
    assert_eq!(session.current_step_id, step_ids::COLLECT_AGE);

    // Two bad ages in a row, then a good one.
    for bad in ["ba mươi", "-1"] {
        session.context.set(session_keys::USER_INPUT, bad).await;
        flow.execute_session(&mut session).await.unwrap();
        assert_eq!(session.current_step_id, step_ids::COLLECT_AGE);
    }
    session.context.set(session_keys::USER_INPUT, "30").await;
    flow.execute_session(&mut session).await.unwrap();
    assert_eq!(session.current_step_id, step_ids::COLLECT_GENDER);
}
