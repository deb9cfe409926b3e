pub mod protocol;
pub mod session;

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use courier_common::protocol::ws::WS_PATH;
use serde::Deserialize;
use tracing::warn;

use crate::context::RelayContext;
use crate::error::{current_request_id, request_id_from_headers_or_generate, RelayError};
use crate::validation::MAX_WS_TRANSPORT_BYTES;

use self::session::ConnectionSession;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

pub fn router(context: RelayContext) -> Router {
    Router::new().route(WS_PATH, get(ws_upgrade)).with_state(context)
}

/// Authenticate, then upgrade. The token check runs before the upgrade
/// extractor result is looked at, so a bad token is always a 401 and never
/// opens a channel.
pub async fn ws_upgrade(
    State(context): State<RelayContext>,
    params: Result<Query<ConnectParams>, QueryRejection>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = params
        .ok()
        .and_then(|Query(params)| params.token)
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token_from_headers(&headers).map(ToOwned::to_owned));

    let session = match ConnectionSession::connect(context, token.as_deref()) {
        Ok(session) => session,
        Err(error) => {
            warn!(error = %error, token_present = token.is_some(), "rejecting websocket upgrade");
            return RelayError::from(error).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let request_id =
        current_request_id().unwrap_or_else(|| request_id_from_headers_or_generate(&headers));

    ws.max_frame_size(MAX_WS_TRANSPORT_BYTES)
        .max_message_size(MAX_WS_TRANSPORT_BYTES)
        .on_failed_upgrade(|error| warn!(error = %error, "websocket upgrade failed"))
        .on_upgrade(move |socket| session.run(socket, request_id))
}

fn bearer_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).and_then(extract_bearer_token)
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}
