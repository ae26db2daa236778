//! Bidirectional splicer
//!
//! Joins two chunked endpoints with one pump task per direction. Each
//! pump half-closes its destination on a clean source EOF; a pump error
//! cancels the shared token so the peer aborts instead of lingering on a
//! half-dead connection. Backpressure comes from awaiting every write.

use crate::transport::{ChunkRead, ChunkWrite, Endpoints};
use crate::{Error, Result};
use bytes::Bytes;
use std::io;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Byte counts for a completed splice.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpliceSummary {
    pub client_to_remote: u64,
    pub remote_to_client: u64,
}

/// Pump chunks from `src` into `dst` until EOF, error, or cancellation.
///
/// An optional prologue (bytes already read from the source during
/// probing) is delivered before the stream proper. Returns the number of
/// bytes written.
pub async fn pump(
    mut src: Box<dyn ChunkRead>,
    mut dst: Box<dyn ChunkWrite>,
    prologue: Option<Bytes>,
    cancel: CancellationToken,
) -> Result<u64> {
    let mut transferred = 0u64;

    if let Some(chunk) = prologue {
        if !chunk.is_empty() {
            transferred += chunk.len() as u64;
            dst.write_chunk(chunk).await?;
        }
    }

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = src.next_chunk() => next?,
        };

        match next {
            Some(chunk) => {
                transferred += chunk.len() as u64;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    written = dst.write_chunk(chunk) => written?,
                }
            }
            None => {
                dst.close().await?;
                return Ok(transferred);
            }
        }
    }
}

/// Splice two endpoint pairs until both directions finish.
///
/// `prologue` is delivered remote→client first. The first non-cancel
/// error wins; the peer direction observes `Cancelled`.
pub async fn splice(
    client: Endpoints,
    remote: Endpoints,
    prologue: Option<Bytes>,
    cancel: CancellationToken,
) -> Result<SpliceSummary> {
    let (client_read, client_write) = client;
    let (remote_read, remote_write) = remote;

    let upload = spawn_pump(client_read, remote_write, None, cancel.clone());
    let download = spawn_pump(remote_read, client_write, prologue, cancel.clone());

    let (upload_result, download_result) = tokio::join!(upload, download);
    let upload_result = flatten(upload_result);
    let download_result = flatten(download_result);

    match (upload_result, download_result) {
        (Ok(client_to_remote), Ok(remote_to_client)) => {
            debug!(
                "splice done: {} up, {} down",
                client_to_remote, remote_to_client
            );
            Ok(SpliceSummary {
                client_to_remote,
                remote_to_client,
            })
        }
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(a), Err(b)) => Err(if a.is_cancelled() { b } else { a }),
    }
}

fn spawn_pump(
    src: Box<dyn ChunkRead>,
    dst: Box<dyn ChunkWrite>,
    prologue: Option<Bytes>,
    cancel: CancellationToken,
) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let result = pump(src, dst, prologue, cancel.clone()).await;
        if let Err(ref e) = result {
            // Abort the peer so it observes a reset, not a silent close
            if !e.is_cancelled() {
                cancel.cancel();
            }
        }
        result
    })
}

fn flatten(joined: std::result::Result<Result<u64>, tokio::task::JoinError>) -> Result<u64> {
    match joined {
        Ok(inner) => inner,
        Err(e) => Err(Error::Io(io::Error::new(io::ErrorKind::Other, e))),
    }
}
