//! Conversation title handler

use crate::AppState;
use axum::{extract::State, Json};
use dragongpt_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SummarizeRequest {
    #[validate(length(min = 1, max = 4000))]
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeResponse {
    pub message_summary: String,
}

/// Summarize a conversation's first message into a 2-3 word title
pub async fn summarize_convo(
    State(state): State<AppState>,
    Json(request): Json<SummarizeRequest>,
) -> Result<Json<SummarizeResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("message".to_string()),
    })?;

    let message = request.message.ok_or_else(|| AppError::MissingField {
        field: "message".to_string(),
    })?;

    let summary = tokio::time::timeout(
        state.config.request_timeout(),
        state.summarizer.summarize(&message),
    )
    .await
    .map_err(|_| AppError::ServiceUnavailable {
        message: "Summarization timed out".to_string(),
    })??;

    Ok(Json(SummarizeResponse {
        message_summary: summary,
    }))
}
