use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use chrono::Utc;
use dialog_flow::{ExecutionStatus, Flow, Session, SessionStore};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info};
use uuid::Uuid;

use crate::history::PatientHistoryStore;
use crate::steps::{
    session_keys, step_ids,
    types::{GREETING_NEW_PATIENT, GREETING_RETURNING_PATIENT},
};

#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<Flow>,
    pub sessions: Arc<dyn SessionStore>,
    pub history: Arc<dyn PatientHistoryStore>,
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    patient_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    session_id: String,
    patient_id: String,
    greeting: String,
    returning_patient: bool,
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    session_id: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ExecuteResponse {
    session_id: String,
    reply: Option<String>,
    status: String,
}

/// Middleware adding a correlation id to every request, both as a response
/// header and as a tracing span field.
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/conversations", post(start_conversation))
        .route("/execute", post(execute_turn))
        .route("/session/{id}", get(get_session))
        .layer(from_fn(correlation_id_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("server running on http://{bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

/// Open a new conversation: look the patient up, pick the right greeting and
/// persist a fresh session pointing at the first collection step.
async fn start_conversation(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, StatusCode> {
    // Walk-in patients without an id get a timestamp-derived one.
    let patient_id = request
        .patient_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Utc::now().format("P%Y%m%d%H%M%S").to_string());

    let returning_patient = match state.history.history(&patient_id).await {
        Ok(records) => !records.is_empty(),
        Err(e) => {
            // A broken history store must not block intake.
            error!(error = %e, patient_id, "patient history lookup failed");
            false
        }
    };

    let session_id = Uuid::new_v4().to_string();
    let session = Session::new_from_step(session_id.clone(), step_ids::COLLECT_NAME);
    session
        .context
        .set(session_keys::PATIENT_ID, &patient_id)
        .await;

    if let Err(e) = state.sessions.save(session).await {
        error!(error = %e, session_id, "failed to save new session");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    info!(session_id, patient_id, returning_patient, "conversation started");

    let greeting = if returning_patient {
        GREETING_RETURNING_PATIENT
    } else {
        GREETING_NEW_PATIENT
    };

    Ok(Json(StartResponse {
        session_id,
        patient_id,
        greeting: greeting.to_string(),
        returning_patient,
    }))
}

/// Run one turn of an existing conversation: load the session, inject the
/// patient's message, execute the current step and persist the result.
async fn execute_turn(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, StatusCode> {
    let session_id = request.session_id;
    info!(
        session_id,
        content_length = request.content.len(),
        "processing turn"
    );

    let mut session = match state.sessions.get(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            error!(session_id, "session not found");
            return Err(StatusCode::NOT_FOUND);
        }
        Err(e) => {
            error!(error = %e, session_id, "failed to load session");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    session
        .context
        .set(session_keys::USER_INPUT, &request.content)
        .await;
    session.context.add_user_message(&request.content).await;

    let result = match state.flow.execute_session(&mut session).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, session_id, "flow execution failed");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    if let Some(reply) = &result.reply {
        session.context.add_assistant_message(reply).await;
    }

    if let Err(e) = state.sessions.save(session).await {
        error!(error = %e, session_id, "failed to save session");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let status = match result.status {
        ExecutionStatus::WaitingForInput => "waiting_for_input",
        ExecutionStatus::Completed => "completed",
    };

    info!(session_id, status, "turn completed");

    Ok(Json(ExecuteResponse {
        session_id,
        reply: result.reply,
        status: status.to_string(),
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, StatusCode> {
    match state.sessions.get(&session_id).await {
        Ok(Some(session)) => Ok(Json(session)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(error = %e, session_id, "failed to load session");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
