//! Hub endpoints
//!
//! `POST /api/ws/broadcast` pushes a chat message to every session
//! subscribed to its chat without going through the outbox.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use validator::Validate;

use crate::application::dto::SendMessageRequest;
use crate::domain::ChatMessage;
use crate::presentation::websocket::WsState;
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;

#[derive(Debug, Serialize)]
pub struct BroadcastAccepted {
    pub message: &'static str,
}

pub async fn broadcast(
    State(state): State<WsState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<BroadcastAccepted>, AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    request.validate().map_err(validation_error)?;

    let message = ChatMessage::from(request);
    let payload = serde_json::to_value(&message)?;

    state
        .hub
        .broadcaster()
        .broadcast(message.chat_id.clone(), payload)
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;

    tracing::debug!(chat_id = %message.chat_id, "Broadcast accepted");
    Ok(Json(BroadcastAccepted { message: "ok" }))
}

#[derive(Debug, Serialize)]
pub struct HubHealth {
    pub status: &'static str,
}

/// `GET /api/ws/health`
pub async fn hub_health() -> Json<HubHealth> {
    Json(HubHealth { status: "ok" })
}
