//! WebSocket Connection Handler
//!
//! Upgrades `GET /ws?chats=c1,c2` and hands the socket to the hub.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;

use super::hub::ConnectionHub;
use super::session::Frame;
use crate::presentation::http::extractors::WsAuth;
use crate::shared::error::AppError;

/// State shared by the WebSocket routes.
#[derive(Clone)]
pub struct WsState {
    pub hub: ConnectionHub,
    pub jwt_secret: Arc<str>,
    pub max_message_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Comma-separated chat ids the session subscribes to.
    #[serde(default)]
    pub chats: String,
}

impl ConnectQuery {
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .chats
            .split(',')
            .map(str::trim)
            .filter(|chat| !chat.is_empty())
            .map(str::to_owned)
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close => Message::Close(None),
        }
    }
}

fn to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Ping(data) => Some(Frame::Ping(data.to_vec())),
        Message::Pong(data) => Some(Frame::Pong(data.to_vec())),
        Message::Close(_) => Some(Frame::Close),
        Message::Binary(_) => None,
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<WsState>,
    WsAuth(user): WsAuth,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let topics = query.topics();
    if topics.is_empty() {
        return Err(AppError::BadRequest("at least one chat id is required".into()));
    }
    if state.hub.is_closing() {
        return Err(AppError::Unavailable("server is shutting down".into()));
    }

    tracing::debug!(user_id = %user.user_id, chats = ?topics, "WebSocket upgrade");

    let hub = state.hub.clone();
    Ok(ws
        .max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, hub, topics, user.user_id)))
}

async fn handle_socket(socket: WebSocket, hub: ConnectionHub, topics: Vec<String>, user_id: String) {
    let (sink, stream) = socket.split();
    let stream = stream.filter_map(|message| future::ready(message.map(to_frame).transpose()));
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));

    match hub.connect(topics, stream, sink) {
        Ok(session_id) => {
            tracing::info!(session_id = %session_id, user_id = %user_id, "WebSocket session started");
        }
        Err(e) => {
            tracing::debug!(user_id = %user_id, error = %e, "WebSocket rejected");
        }
    }
}
