//! TwoPass tunnel dispatcher
//!
//! One URL surface, four variants picked by method and headers:
//! a single bidirectional POST (V1), or an upload POST paired with a
//! download GET through the session registry (V2, selected by
//! `X-Session-ID`). Response bodies stream with the gRPC content type,
//! which keeps intermediaries from buffering them.

use super::{auth, AppState};
use crate::common::net;
use crate::session::{Session, SessionGuard, SessionReader};
use crate::transport::{BodyChunkReader, ChunkRead, ChunkWrite, StreamChunkWriter};
use crate::tunnel;
use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

const HEADER_TARGET_HOST: &str = "x-target-host";
const HEADER_TARGET_PORT: &str = "x-target-port";
const HEADER_SESSION_ID: &str = "x-session-id";

const TUNNEL_CONTENT_TYPE: &str = "application/grpc";
const DOWNLOAD_CHUNK: usize = 16 * 1024;

/// Dispatch one tunnel request.
pub async fn handle(state: AppState, req: Request) -> Response {
    let request_config = state.config.for_request(req.uri().query());

    // The per-request `log` override rides on the span for filtering
    let span = tracing::info_span!("twopass", log = %request_config.log_level);
    dispatch(state, req, request_config).instrument(span).await
}

async fn dispatch(
    state: AppState,
    req: Request,
    request_config: crate::config::RequestConfig,
) -> Response {
    if !auth::authorize_basic(req.headers().get(AUTHORIZATION), &request_config.password) {
        return reject(StatusCode::UNAUTHORIZED, "authentication required");
    }

    let (host, port) = match parse_target(req.headers()) {
        Ok(target) => target,
        Err(message) => return reject(StatusCode::BAD_REQUEST, &message),
    };

    let session_id = req
        .headers()
        .get(HEADER_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let method = req.method().clone();
    match session_id {
        Some(id) if method == Method::POST => v2_upload(state, req, id, host, port).await,
        Some(id) if method == Method::GET => v2_download(state, id, host, port).await,
        Some(_) => reject_method(&method),
        None if method == Method::POST => v1(req, host, port).await,
        None => reject_method(&method),
    }
}

fn parse_target(headers: &HeaderMap) -> std::result::Result<(String, u16), String> {
    let host = headers
        .get(HEADER_TARGET_HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing X-Target-Host".to_string())?;
    let host = net::validate_target_host(host).map_err(|e| e.to_string())?;

    let port = headers
        .get(HEADER_TARGET_PORT)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing X-Target-Port".to_string())?;
    let port = net::validate_target_port(port).map_err(|e| e.to_string())?;

    Ok((host, port))
}

/// V1: one request, both directions.
async fn v1(req: Request, host: String, port: u16) -> Response {
    let stream = match net::connect_tcp(&host, port).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("V1 {}:{}: {}", host, port, e);
            return reject(StatusCode::BAD_GATEWAY, "connect failed");
        }
    };
    debug!("V1 tunnel open to {}:{}", host, port);

    let (remote_read, remote_write) = stream.into_split();
    let cancel = CancellationToken::new();

    // Upload: request body into the socket, half-closing it when the
    // client finishes. Cancelled when the download side is dropped.
    let upload_cancel = cancel.clone();
    let body = req.into_body();
    tokio::spawn(async move {
        let src = Box::new(BodyChunkReader::new(body.into_data_stream()));
        let dst = Box::new(StreamChunkWriter::new(remote_write));
        match tunnel::pump(src, dst, None, upload_cancel).await {
            Ok(n) => debug!("V1 upload done: {} bytes", n),
            Err(e) if e.is_cancelled() => debug!("V1 upload cancelled"),
            Err(e) => debug!("V1 upload failed: {}", e),
        }
    });

    // Download: the socket is the response body; the guard cancels the
    // upload pump once the response is done.
    let download = GuardedStream {
        inner: ReaderStream::with_capacity(remote_read, DOWNLOAD_CHUNK),
        _guard: cancel.drop_guard(),
    };

    tunnel_response(StatusCode::OK, Body::from_stream(download))
}

/// V2 upload: claim the session's write half and drain the request body
/// into it.
async fn v2_upload(
    state: AppState,
    req: Request,
    id: String,
    host: String,
    port: u16,
) -> Response {
    let session = state.registry.get_or_create(&id);

    if let Err(e) = session.connect(&host, port).await {
        warn!("session {} connect {}:{}: {}", id, host, port, e);
        state.registry.remove(&id);
        return reject(StatusCode::BAD_GATEWAY, "connect failed");
    }

    let Some(mut writer) = session.claim_writer() else {
        debug!("session {} rejected duplicate upload", id);
        return reject(StatusCode::CONFLICT, "session already has an upload");
    };

    let mut body = BodyChunkReader::new(req.into_body().into_data_stream());
    let mut uploaded = 0u64;
    loop {
        match body.next_chunk().await {
            Ok(Some(chunk)) => {
                uploaded += chunk.len() as u64;
                session.touch();
                if let Err(e) = writer.write_chunk(chunk).await {
                    warn!("session {} upload write failed: {}", id, e);
                    state.registry.remove(&id);
                    return reject(StatusCode::BAD_GATEWAY, "upload failed");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("session {} upload body ended early: {}", id, e);
                state.registry.remove(&id);
                return reject(StatusCode::BAD_GATEWAY, "upload aborted");
            }
        }
    }

    // No shutdown here: the download half may still be draining
    session.park_writer(writer);
    session.touch();
    debug!("session {} upload complete: {} bytes", id, uploaded);

    tunnel_response(StatusCode::CREATED, Body::empty())
}

/// V2 download: claim the session's read half and stream it out.
async fn v2_download(state: AppState, id: String, host: String, port: u16) -> Response {
    let session = state.registry.get_or_create(&id);

    if let Err(e) = session.connect(&host, port).await {
        warn!("session {} connect {}:{}: {}", id, host, port, e);
        state.registry.remove(&id);
        return reject(StatusCode::BAD_GATEWAY, "connect failed");
    }

    let Some(reader) = session.claim_reader() else {
        debug!("session {} rejected duplicate download", id);
        return reject(StatusCode::CONFLICT, "session already has a download");
    };
    debug!("session {} download streaming", id);

    let guard = SessionGuard::new(state.registry.clone(), id);
    tunnel_response(
        StatusCode::OK,
        Body::from_stream(download_stream(reader, session, guard)),
    )
}

/// Stream the session's read half, touching the idle clock per chunk and
/// tearing the session down on every exit path via the guard.
fn download_stream(
    reader: SessionReader,
    session: Arc<Session>,
    guard: SessionGuard,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    struct DownloadState {
        reader: SessionReader,
        session: Arc<Session>,
        _guard: SessionGuard,
        done: bool,
    }

    futures::stream::unfold(
        DownloadState {
            reader,
            session,
            _guard: guard,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }
            match state.reader.next_chunk().await {
                Ok(Some(chunk)) => {
                    state.session.touch();
                    Some((Ok(chunk), state))
                }
                Ok(None) => None,
                Err(e) => {
                    state.done = true;
                    let error = io::Error::new(io::ErrorKind::Other, e.to_string());
                    Some((Err(error), state))
                }
            }
        },
    )
}

fn tunnel_response(status: StatusCode, body: Body) -> Response {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, TUNNEL_CONTENT_TYPE)
        .header(CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, message.to_string()).into_response()
}

fn reject_method(method: &Method) -> Response {
    reject(
        StatusCode::METHOD_NOT_ALLOWED,
        &format!("method {} not allowed", method),
    )
}

pin_project! {
    /// Pass-through stream holding a cancellation guard.
    struct GuardedStream<S> {
        #[pin]
        inner: S,
        _guard: tokio_util::sync::DropGuard,
    }
}

impl<S: Stream> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}
