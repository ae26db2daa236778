//! UDP-for-DNS over DoH
//!
//! A UDP tunnel whose destination port is 53 never touches a UDP socket:
//! the client stream carries length-prefixed DNS queries, each query is
//! relayed through DNS-over-HTTPS, and every answer is framed back with
//! the same two-byte big-endian length prefix.

use crate::dns::DohClient;
use crate::transport::{ChunkRead, ChunkWrite};
use crate::Result;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::task::JoinSet;
use tracing::warn;
use url::Url;

/// Incremental decoder for `length(2 BE) · payload(length)` frames.
///
/// A frame straddling a chunk boundary stays buffered until complete. A
/// zero length prefix is malformed; it drops whatever is buffered so a
/// desynchronized stream cannot be misread as queries.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.buf.len() < 2 {
            return None;
        }
        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        if len == 0 {
            warn!(
                "zero-length DNS frame, dropping {} buffered bytes",
                self.buf.len()
            );
            self.buf.clear();
            return None;
        }
        if self.buf.len() < 2 + len {
            return None;
        }
        self.buf.advance(2);
        Some(self.buf.split_to(len).freeze())
    }
}

/// Frame a DNS message with its length prefix.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(2 + payload.len());
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    out.freeze()
}

/// Serve DNS queries from the client stream until EOF.
///
/// Queries run as concurrent tasks; answers are written back in
/// completion order. Upstream failures are per-query and non-fatal,
/// client-write failures tear the engine down.
pub async fn run(
    mut client_read: Box<dyn ChunkRead>,
    client_write: &mut dyn ChunkWrite,
    initial_payload: Bytes,
    doh: DohClient,
    doh_url: Url,
) -> Result<()> {
    let mut decoder = FrameDecoder::new();
    decoder.extend(&initial_payload);

    let mut queries: JoinSet<Result<Bytes>> = JoinSet::new();
    let mut client_eof = false;

    loop {
        while let Some(query) = decoder.next_frame() {
            let doh = doh.clone();
            let url = doh_url.clone();
            queries.spawn(async move { doh.query(&url, query).await });
        }

        // In-flight queries are drained after client EOF
        if client_eof && queries.is_empty() {
            return Ok(());
        }

        tokio::select! {
            chunk = client_read.next_chunk(), if !client_eof => match chunk? {
                Some(chunk) => decoder.extend(&chunk),
                None => client_eof = true,
            },
            answered = queries.join_next(), if !queries.is_empty() => match answered {
                Some(Ok(Ok(answer))) => {
                    if answer.len() > u16::MAX as usize {
                        warn!("DoH answer too large to frame: {} bytes", answer.len());
                        continue;
                    }
                    client_write.write_chunk(encode_frame(&answer)).await?;
                }
                Some(Ok(Err(e))) => warn!("DoH query failed: {}", e),
                Some(Err(e)) => warn!("DoH task panicked: {}", e),
                None => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let query = [0x12u8, 0x34, 0x01, 0x00, 0x00, 0x01];
        let framed = encode_frame(&query);
        assert_eq!(framed.len(), 2 + query.len());
        assert_eq!(&framed[..2], &[0x00, 0x06]);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&framed);
        assert_eq!(&decoder.next_frame().unwrap()[..], &query);
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_frame_straddles_chunks() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x00]);
        assert!(decoder.next_frame().is_none());
        decoder.extend(&[0x04, 0xaa, 0xbb]);
        assert!(decoder.next_frame().is_none());
        decoder.extend(&[0xcc, 0xdd]);
        assert_eq!(
            &decoder.next_frame().unwrap()[..],
            &[0xaa, 0xbb, 0xcc, 0xdd]
        );
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&encode_frame(b"one"));
        chunk.extend_from_slice(&encode_frame(b"four"));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&chunk);
        assert_eq!(&decoder.next_frame().unwrap()[..], b"one");
        assert_eq!(&decoder.next_frame().unwrap()[..], b"four");
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_zero_length_prefix_drops_buffer() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x00, 0x00, 0xde, 0xad]);
        assert!(decoder.next_frame().is_none());
        // Buffer was discarded; later frames parse cleanly
        decoder.extend(&encode_frame(b"ok"));
        assert_eq!(&decoder.next_frame().unwrap()[..], b"ok");
    }
}
