//! Outbound TCP with failure-aware retry
//!
//! Some middleboxes accept a TCP connection and then silently drop it.
//! The probe detects that class by waiting for the first byte after
//! sending the initial payload: a peer that closes without producing any
//! data is a silent failure, and the caller may re-probe a relay once.

use crate::common::net::{self, parse_host_port};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const FIRST_CHUNK: usize = 16 * 1024;

/// A probed outbound connection.
///
/// `first` holds the bytes already read while probing; the splicer
/// delivers them to the client as a prologue before the remaining socket
/// bytes.
#[derive(Debug)]
pub struct Outbound {
    pub stream: TcpStream,
    pub first: Bytes,
}

/// Open `host:port`, send `initial_payload`, and wait for the first byte.
///
/// Returns `None` when the peer closes without producing any data (the
/// silent-failure signal). There is deliberately no read timeout: a slow
/// target is not a failed target.
pub async fn probe(host: &str, port: u16, initial_payload: &[u8]) -> Result<Option<Outbound>> {
    let mut stream = net::connect_tcp(host, port).await?;

    if !initial_payload.is_empty() {
        stream.write_all(initial_payload).await?;
    }

    let mut buf = BytesMut::with_capacity(FIRST_CHUNK);
    let n = stream.read_buf(&mut buf).await?;
    if n == 0 {
        debug!("probe {}:{} closed without data", host, port);
        return Ok(None);
    }

    Ok(Some(Outbound {
        stream,
        first: buf.freeze(),
    }))
}

/// Probe the primary target, falling back to the relay once.
///
/// The relay address is `host[:port]`; a missing port defaults to the
/// original target port. No further retries after the relay.
pub async fn connect_with_fallback(
    host: &str,
    port: u16,
    initial_payload: &[u8],
    relay_addr: Option<&str>,
) -> Result<Outbound> {
    match probe(host, port, initial_payload).await {
        Ok(Some(outbound)) => return Ok(outbound),
        Ok(None) => {
            warn!("{}:{} accepted but went silent", host, port);
        }
        Err(e) => {
            warn!("{}:{} unreachable: {}", host, port, e);
        }
    }

    let Some(relay_addr) = relay_addr else {
        return Err(Error::connect(format!(
            "{}:{} failed and no relay configured",
            host, port
        )));
    };

    let (relay_host, relay_port) = parse_host_port(relay_addr, port)?;
    debug!("retrying via relay {}:{}", relay_host, relay_port);

    match probe(&relay_host, relay_port, initial_payload).await? {
        Some(outbound) => Ok(outbound),
        None => Err(Error::connect(format!(
            "relay {}:{} produced no data",
            relay_host, relay_port
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listen() -> (TcpListener, String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_probe_sees_first_bytes() {
        let (listener, host, port) = listen().await;

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            socket.write_all(b"world").await.unwrap();
        });

        let outbound = probe(&host, port, b"hello").await.unwrap().unwrap();
        assert_eq!(&outbound.first[..], b"world");
    }

    #[tokio::test]
    async fn test_probe_silent_close() {
        let (listener, host, port) = listen().await;

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        assert!(probe(&host, port, b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fallback_reaches_relay() {
        // Primary accepts then closes; relay answers.
        let (primary, primary_host, primary_port) = listen().await;
        let (relay, _relay_host, relay_port) = listen().await;
        let relay_addr = format!("127.0.0.1:{}", relay_port);

        tokio::spawn(async move {
            let (socket, _) = primary.accept().await.unwrap();
            drop(socket);
        });
        tokio::spawn(async move {
            let (mut socket, _) = relay.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"via-relay").await.unwrap();
        });

        let outbound =
            connect_with_fallback(&primary_host, primary_port, b"ping", Some(&relay_addr))
                .await
                .unwrap();
        assert_eq!(&outbound.first[..], b"via-relay");
    }

    #[tokio::test]
    async fn test_fallback_without_relay_fails() {
        let (listener, host, port) = listen().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let err = connect_with_fallback(&host, port, b"", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect(_)));
    }
}
