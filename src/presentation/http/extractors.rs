//! Custom Extractors
//!
//! Axum extractors for authentication and request parsing.

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;

use crate::presentation::middleware::{verify_token, AuthUser};
use crate::presentation::websocket::WsState;
use crate::shared::error::AppError;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Caller of the WebSocket upgrade, authenticated from the `Authorization`
/// header or, failing that, the `token` query parameter.
#[derive(Debug, Clone)]
pub struct WsAuth(pub AuthUser);

impl FromRequestParts<WsState> for WsAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &WsState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .ok()
            .map(|TypedHeader(Authorization(bearer))| bearer.token().to_owned());

        let token = match header {
            Some(token) => token,
            None => parts
                .extract::<Query<TokenQuery>>()
                .await
                .ok()
                .and_then(|Query(query)| query.token)
                .ok_or_else(|| AppError::Unauthorized("Missing authorization token".into()))?,
        };

        verify_token(&token, &state.jwt_secret).map(WsAuth)
    }
}
