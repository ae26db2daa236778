//! Per-connection VLESS flow
//!
//! Parse the handshake, authenticate the UUID, acknowledge, then hand the
//! connection to the TCP splicer or the DNS engine. Parsing happens
//! before authentication so malformed clients never learn whether a UUID
//! would have matched, and neither path reaches the connect stage.

use super::{header::Header, response_frame, udp, Command, DNS_PORT};
use crate::config::RequestConfig;
use crate::dns::DohClient;
use crate::outbound;
use crate::transport::websocket::{split_websocket, CLOSE_INTERNAL_ERROR};
use crate::transport::{ChunkRead, ChunkWrite, StreamChunkReader, StreamChunkWriter};
use crate::tunnel;
use axum::extract::ws::WebSocket;
use bytes::Bytes;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Close reason for a failed UUID check (clients key off this string)
const REASON_INVALID_USER: &str = "ERROR: Invalid user ID";
const REASON_MALFORMED: &str = "ERROR: Malformed header";
const REASON_CONNECT: &str = "ERROR: Connect failed";
const REASON_UDP_PORT: &str = "ERROR: UDP is DNS-only";

/// Serve one accepted WebSocket connection.
pub async fn serve(
    socket: WebSocket,
    early_data: Option<Bytes>,
    config: RequestConfig,
    doh: DohClient,
) {
    let (mut reader, mut writer) = split_websocket(socket);

    // 0-RTT early data, or the first message frame
    let first_chunk = match early_data {
        Some(chunk) => chunk,
        None => match reader.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return,
            Err(e) => {
                debug!("client went away before handshake: {}", e);
                return;
            }
        },
    };

    let header = match Header::parse(&first_chunk) {
        Ok(header) => header,
        Err(e) => {
            warn!("malformed handshake: {}", e);
            let _ = writer.close_with(CLOSE_INTERNAL_ERROR, REASON_MALFORMED).await;
            return;
        }
    };

    let authenticated: bool = header
        .uuid
        .as_bytes()
        .ct_eq(config.user_id.as_bytes())
        .into();
    if !authenticated {
        warn!("rejected unknown client {}", header.uuid);
        let _ = writer
            .close_with(CLOSE_INTERNAL_ERROR, REASON_INVALID_USER)
            .await;
        return;
    }

    let payload = first_chunk.slice(header.payload_offset..);
    debug!(
        "{} tunnel to {}:{} ({} early bytes)",
        header.command,
        header.addr,
        header.port,
        payload.len()
    );

    match header.command {
        Command::Tcp => serve_tcp(reader, writer, &header, payload, &config).await,
        Command::Udp => serve_udp(reader, writer, &header, payload, &config, doh).await,
    }
}

async fn serve_tcp(
    reader: impl ChunkRead + 'static,
    mut writer: crate::transport::WsChunkWriter,
    header: &Header,
    payload: Bytes,
    config: &RequestConfig,
) {
    let host = header.addr.host();
    let outbound = match outbound::connect_with_fallback(
        &host,
        header.port,
        &payload,
        config.relay_addr.as_deref(),
    )
    .await
    {
        Ok(outbound) => outbound,
        Err(e) => {
            warn!("{}:{}: {}", header.addr, header.port, e);
            let _ = writer.close_with(CLOSE_INTERNAL_ERROR, REASON_CONNECT).await;
            return;
        }
    };

    // Acknowledge before any target bytes flow
    if let Err(e) = writer.write_chunk(response_frame(header.version)).await {
        debug!("client went away after connect: {}", e);
        return;
    }

    let (remote_read, remote_write) = outbound.stream.into_split();
    let result = tunnel::splice(
        (Box::new(reader), Box::new(writer)),
        (
            Box::new(StreamChunkReader::new(remote_read)),
            Box::new(StreamChunkWriter::new(remote_write)),
        ),
        Some(outbound.first),
        CancellationToken::new(),
    )
    .await;

    match result {
        Ok(summary) => debug!(
            "{}:{} closed ({} up, {} down)",
            header.addr, header.port, summary.client_to_remote, summary.remote_to_client
        ),
        Err(e) if e.is_cancelled() => debug!("{}:{} cancelled", header.addr, header.port),
        Err(e) => warn!("{}:{} splice failed: {}", header.addr, header.port, e),
    }
}

async fn serve_udp(
    reader: impl ChunkRead + 'static,
    mut writer: crate::transport::WsChunkWriter,
    header: &Header,
    payload: Bytes,
    config: &RequestConfig,
    doh: DohClient,
) {
    if header.port != DNS_PORT {
        warn!("refusing UDP tunnel to port {}", header.port);
        let _ = writer.close_with(CLOSE_INTERNAL_ERROR, REASON_UDP_PORT).await;
        return;
    }

    if let Err(e) = writer.write_chunk(response_frame(header.version)).await {
        debug!("client went away after handshake: {}", e);
        return;
    }

    let result = udp::run(
        Box::new(reader),
        &mut writer,
        payload,
        doh,
        config.doh_url.clone(),
    )
    .await;

    match result {
        Ok(()) => debug!("DNS tunnel finished"),
        Err(e) => warn!("DNS tunnel failed: {}", e),
    }

    let _ = writer.close().await;
}
