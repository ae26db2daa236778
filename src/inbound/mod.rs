//! HTTP surface
//!
//! One listener serves everything: WebSocket upgrades go to the VLESS
//! core, requests carrying tunnel headers go to the TwoPass dispatcher,
//! `/info` answers diagnostics, and anything else gets the masquerade
//! 404 so the host looks like an idle web server.

mod auth;
mod info;
mod lesspass;
mod twopass;

pub use auth::authorize_basic;

use crate::config::Config;
use crate::dns::DohClient;
use crate::session::SessionRegistry;
use crate::Result;
use axum::extract::{Request, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http::header::UPGRADE;
use http::{HeaderMap, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

const MASQUERADE_404: &str = "<html>\r\n\
<head><title>404 Not Found</title></head>\r\n\
<body>\r\n\
<center><h1>404 Not Found</h1></center>\r\n\
<hr><center>nginx</center>\r\n\
</body>\r\n\
</html>\r\n";

const HEADER_TARGET_HOST: &str = "x-target-host";

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub doh: DohClient,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: Arc<SessionRegistry>, doh: DohClient) -> Self {
        AppState {
            config,
            registry,
            doh,
        }
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/info", get(info::info))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Method-and-header dispatch shared by every path.
async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    if is_websocket_upgrade(req.headers()) {
        return lesspass::handle_upgrade(state, req).await;
    }

    if req.headers().contains_key(HEADER_TARGET_HOST) {
        return twopass::handle(state, req).await;
    }

    masquerade_404()
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn masquerade_404() -> Response {
    (StatusCode::NOT_FOUND, Html(MASQUERADE_404)).into_response()
}

/// Bind and serve until the task is aborted.
pub async fn serve(state: AppState, listen: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));

        headers.insert(UPGRADE, "WebSocket".parse().unwrap());
        assert!(is_websocket_upgrade(&headers));

        headers.insert(UPGRADE, "h2c".parse().unwrap());
        assert!(!is_websocket_upgrade(&headers));
    }

    #[test]
    fn test_masquerade_page_shape() {
        assert!(MASQUERADE_404.contains("404 Not Found"));
        assert!(MASQUERADE_404.contains("nginx"));
    }
}
