//! HTTP body endpoints
//!
//! An HTTP request body is the upload half-stream of a tunnel; the
//! response body (built elsewhere from the socket's read side) is the
//! download half.

use super::ChunkRead;
use crate::{Error, Result};
use async_trait::async_trait;
use axum::body::BodyDataStream;
use bytes::Bytes;
use futures::StreamExt;

/// Chunked reader over a streaming HTTP request body.
pub struct BodyChunkReader {
    inner: BodyDataStream,
}

impl BodyChunkReader {
    pub fn new(inner: BodyDataStream) -> Self {
        BodyChunkReader { inner }
    }
}

#[async_trait]
impl ChunkRead for BodyChunkReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.inner.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(Error::from(e)),
            None => Ok(None),
        }
    }
}
