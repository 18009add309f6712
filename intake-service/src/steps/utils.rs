use dialog_flow::{Context, FlowError, Result};

use super::types::{CollectedInfo, session_keys};

/// The pending user input for this turn, trimmed.
pub(crate) async fn user_input(context: &Context) -> Result<String> {
    let input: String = context
        .get(session_keys::USER_INPUT)
        .await
        .ok_or_else(|| FlowError::Context("user_input not found".to_string()))?;
    Ok(input.trim().to_string())
}

pub(crate) async fn collected(context: &Context) -> CollectedInfo {
    context
        .get(session_keys::COLLECTED_INFO)
        .await
        .unwrap_or_default()
}

pub(crate) async fn store_collected(context: &Context, info: &CollectedInfo) {
    context.set(session_keys::COLLECTED_INFO, info).await;
}
