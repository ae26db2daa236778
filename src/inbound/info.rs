//! `/info` diagnostic endpoint

use super::{auth, AppState};
use crate::VERSION;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct InfoResponse {
    version: &'static str,
    listen: String,
    log_level: String,
    doh: Option<String>,
    relay_configured: bool,
    auth_enabled: bool,
    sessions: usize,
}

pub async fn info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !auth::authorize_basic(headers.get(AUTHORIZATION), &state.config.password) {
        return (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, "Basic realm=\"info\"")],
            "authentication required",
        )
            .into_response();
    }

    Json(InfoResponse {
        version: VERSION,
        listen: state.config.listen.to_string(),
        log_level: state.config.log_level.to_string(),
        doh: state.config.doh_url.host_str().map(str::to_owned),
        relay_configured: state.config.relay_addr.is_some(),
        auth_enabled: !state.config.password.is_empty(),
        sessions: state.registry.len(),
    })
    .into_response()
}
