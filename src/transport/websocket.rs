//! WebSocket byte-stream adapter
//!
//! Turns a message-event WebSocket into a lazy chunk sequence and an
//! exclusive binary-frame writer. Chunks are emitted in the order the
//! transport delivered them; the sequence ends on a Close frame and fails
//! on a transport error.

use super::{ChunkRead, ChunkWrite};
use crate::{Error, Result};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Internal error, used for auth/protocol/connect failures
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Split a WebSocket into its chunk-stream halves.
pub fn split_websocket(socket: WebSocket) -> (WsChunkReader, WsChunkWriter) {
    let (sink, stream) = socket.split();
    (
        WsChunkReader { inner: stream },
        WsChunkWriter {
            inner: sink,
            closed: false,
        },
    )
}

/// Lazy chunk sequence over incoming message frames.
pub struct WsChunkReader {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl ChunkRead for WsChunkReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        while let Some(message) = self.inner.next().await {
            match message.map_err(Error::from)? {
                Message::Binary(data) => return Ok(Some(Bytes::from(data))),
                Message::Text(text) => return Ok(Some(Bytes::from(text.into_bytes()))),
                // Pings are answered by the transport layer
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return Ok(None),
            }
        }
        Ok(None)
    }
}

/// Exclusive writer sending binary frames.
pub struct WsChunkWriter {
    inner: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl WsChunkWriter {
    /// Send a Close frame with an explicit code and reason. Used for the
    /// error closes (1011) mandated by the handshake failure paths.
    pub async fn close_with(&mut self, code: u16, reason: &'static str) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl ChunkWrite for WsChunkWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.inner
            .send(Message::Binary(chunk.to_vec()))
            .await
            .map_err(Error::from)
    }

    async fn close(&mut self) -> Result<()> {
        self.close_with(CLOSE_NORMAL, "").await
    }
}
