//! DNS-over-DoH engine tests against a loopback DoH upstream

use edgepass::dns::DohClient;
use edgepass::transport::{StreamChunkReader, StreamChunkWriter};
use edgepass::vless::udp::{encode_frame, run};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

const ANSWER: &[u8] = b"\x12\x34\x81\x80answer-bytes";

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Minimal DoH upstream: answers every POST with a fixed DNS message and
/// reports each received query body on the channel.
async fn start_doh_upstream(queries: mpsc::UnboundedSender<Vec<u8>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let queries = queries.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut tmp = [0u8; 1024];

                let header_end = loop {
                    let n = match socket.read(&mut tmp).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&tmp[..n]);
                    if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                        break pos + 4;
                    }
                };

                let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                let content_length: usize = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);

                while buf.len() < header_end + content_length {
                    let n = match socket.read(&mut tmp).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&tmp[..n]);
                }

                queries
                    .send(buf[header_end..header_end + content_length].to_vec())
                    .unwrap();

                let response = format!(
                    "HTTP/1.1 200 OK\r\n\
                     Content-Type: application/dns-message\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n",
                    ANSWER.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(ANSWER).await;
            });
        }
    });

    addr
}

async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Vec<u8> {
    let mut len = [0u8; 2];
    reader.read_exact(&mut len).await.unwrap();
    let mut payload = vec![0u8; u16::from_be_bytes(len) as usize];
    reader.read_exact(&mut payload).await.unwrap();
    payload
}

#[tokio::test]
async fn test_queries_are_relayed_and_answers_reframed() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let upstream = start_doh_upstream(tx).await;
    let url = Url::parse(&format!("http://{}/dns-query", upstream)).unwrap();

    let (client_side, engine_side) = tokio::io::duplex(4096);
    let (engine_read, engine_write) = tokio::io::split(engine_side);
    let (mut client_read, mut client_write) = tokio::io::split(client_side);

    // A 28-byte query arrives as initial payload, a second one later on
    // the stream
    let first_query = [0xabu8; 28];
    let second_query = b"\x00\x02\x01\x00second".to_vec();

    let initial = encode_frame(&first_query);
    let engine = tokio::spawn(async move {
        let reader = Box::new(StreamChunkReader::new(engine_read));
        let mut writer = StreamChunkWriter::new(engine_write);
        run(
            reader,
            &mut writer,
            initial,
            DohClient::new().unwrap(),
            url,
        )
        .await
    });

    client_write
        .write_all(&encode_frame(&second_query))
        .await
        .unwrap();
    client_write.shutdown().await.unwrap();

    // Both answers come back framed with the 2-byte length prefix
    assert_eq!(read_frame(&mut client_read).await, ANSWER);
    assert_eq!(read_frame(&mut client_read).await, ANSWER);

    engine.await.unwrap().unwrap();

    // The upstream saw exactly the DNS payloads, unframed
    let mut received = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    received.sort_by_key(|q| q.len());
    assert!(received.contains(&second_query));
    assert!(received.contains(&first_query.to_vec()));
}

#[tokio::test]
async fn test_upstream_failure_drops_query_and_continues() {
    // Upstream that 500s the first request and answers the second
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut first = true;
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let fail = std::mem::replace(&mut first, false);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut tmp = [0u8; 1024];
                loop {
                    let n = match socket.read(&mut tmp).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&tmp[..n]);
                    if find_subsequence(&buf, b"\r\n\r\n").is_some() {
                        break;
                    }
                }
                let response = if fail {
                    "HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_string()
                } else {
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        ANSWER.len()
                    )
                };
                let _ = socket.write_all(response.as_bytes()).await;
                if !fail {
                    let _ = socket.write_all(ANSWER).await;
                }
            });
        }
    });
    let url = Url::parse(&format!("http://{}/dns-query", upstream)).unwrap();

    let (client_side, engine_side) = tokio::io::duplex(4096);
    let (engine_read, engine_write) = tokio::io::split(engine_side);
    let (mut client_read, mut client_write) = tokio::io::split(client_side);

    let engine = tokio::spawn(async move {
        let reader = Box::new(StreamChunkReader::new(engine_read));
        let mut writer = StreamChunkWriter::new(engine_write);
        run(
            reader,
            &mut writer,
            encode_frame(b"doomed-query"),
            DohClient::new().unwrap(),
            url,
        )
        .await
    });

    // The failed query is invisible; a later one still gets its answer
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    client_write
        .write_all(&encode_frame(b"retried-query"))
        .await
        .unwrap();
    client_write.shutdown().await.unwrap();

    assert_eq!(read_frame(&mut client_read).await, ANSWER);
    engine.await.unwrap().unwrap();

    // Engine terminated; client sees EOF after the single answer
    let mut rest = Vec::new();
    client_read.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
