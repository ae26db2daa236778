//! Chunked adapters over `AsyncRead`/`AsyncWrite` streams
//!
//! Generic over the inner stream so the same adapters serve TCP socket
//! halves in production and in-memory duplex pipes in tests.

use super::{ChunkRead, ChunkWrite};
use crate::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read buffer size per chunk
const READ_CHUNK: usize = 16 * 1024;

/// Chunked reader over a byte stream.
pub struct StreamChunkReader<R> {
    inner: R,
}

impl<R> StreamChunkReader<R> {
    pub fn new(inner: R) -> Self {
        StreamChunkReader { inner }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ChunkRead for StreamChunkReader<R> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = self.inner.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }
}

/// Chunked writer over a byte stream.
pub struct StreamChunkWriter<W> {
    inner: W,
    closed: bool,
}

impl<W> StreamChunkWriter<W> {
    pub fn new(inner: W) -> Self {
        StreamChunkWriter {
            inner,
            closed: false,
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ChunkWrite for StreamChunkWriter<W> {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.inner.write_all(&chunk).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await?;
        Ok(())
    }
}
