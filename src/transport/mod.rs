//! Byte-chunk transport abstraction
//!
//! The tunnel cores move opaque byte chunks between two endpoints without
//! caring whether a side is a WebSocket, an HTTP request body, or a TCP
//! socket. Each concrete transport supplies a read half and a write half;
//! aborting an endpoint is expressed by dropping its halves.

pub mod body;
pub mod tcp;
pub mod websocket;

pub use body::BodyChunkReader;
pub use tcp::{StreamChunkReader, StreamChunkWriter};
pub use websocket::{split_websocket, WsChunkReader, WsChunkWriter};

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Read side of a chunked byte stream.
#[async_trait]
pub trait ChunkRead: Send {
    /// Next chunk in transport order; `None` on a clean end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Write side of a chunked byte stream.
#[async_trait]
pub trait ChunkWrite: Send {
    /// Write one chunk. The call completes only once the transport has
    /// accepted the bytes, which is what gives the pumps backpressure.
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()>;

    /// Half-close the write side. Closing an already-closed endpoint is
    /// a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Boxed endpoint pair, read half and write half.
pub type Endpoints = (Box<dyn ChunkRead>, Box<dyn ChunkWrite>);
