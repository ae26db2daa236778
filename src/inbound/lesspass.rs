//! VLESS-over-WebSocket upgrade
//!
//! Pulls early data out of `Sec-WebSocket-Protocol` before upgrading,
//! then hands the socket to the VLESS handler. The server never echoes a
//! selected subprotocol back.

use super::AppState;
use crate::common::decode_early_data;
use crate::vless;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request};
use axum::response::{IntoResponse, Response};
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::StatusCode;
use tracing::{debug, Instrument};

pub async fn handle_upgrade(state: AppState, req: Request) -> Response {
    let request_config = state.config.for_request(req.uri().query());

    let early_data = match req
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => match decode_early_data(value) {
            Ok(data) => data,
            Err(e) => {
                debug!("bad early data: {}", e);
                return (StatusCode::BAD_REQUEST, "invalid subprotocol").into_response();
            }
        },
        None => None,
    };

    let (mut parts, _body) = req.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let doh = state.doh.clone();
    let span = tracing::info_span!("lesspass", log = %request_config.log_level);
    upgrade.on_upgrade(move |socket| {
        vless::serve(socket, early_data, request_config, doh).instrument(span)
    })
}
