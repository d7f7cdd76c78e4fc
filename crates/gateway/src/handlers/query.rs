//! Question answering handler

use crate::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dragongpt_common::context::ChatTurn;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use validator::Validate;

/// Query request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[validate(length(max = 4000))]
    #[serde(default)]
    pub query: Option<String>,

    #[validate(length(max = 200))]
    #[serde(default)]
    pub prior_conversation: Option<Vec<ChatTurn>>,
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

/// Answer a question as a plain-text stream
pub async fn query(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> Response {
    let Some(query) = request.query.as_deref().filter(|q| !q.trim().is_empty()) else {
        return detail(StatusCode::BAD_REQUEST, "Query is required");
    };
    if let Err(e) = request.validate() {
        return detail(StatusCode::BAD_REQUEST, e.to_string());
    }

    info!(query = %query, "Received question");
    let history = request.prior_conversation.as_deref().unwrap_or_default();

    let context = state.augmenter.augment(query).await;

    match state.answers.stream_answer(query, history, &context.text).await {
        Ok(stream) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(e) => {
            error!(query = %query, error = %e, "Failed to start answer stream");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "answer": e.to_string() })),
            )
                .into_response()
        }
    }
}
