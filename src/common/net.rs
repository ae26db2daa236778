//! Network utilities

use crate::{Error, Result};
use socket2::SockRef;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Outbound connect timeout (reads are unbounded)
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// Normalize and validate a tunnel target host.
///
/// Accepts domains, IPv4 literals, and bracketed IPv6 literals; rejects
/// anything outside `[A-Za-z0-9._\-:\[\]]`. Returns the lowercased,
/// trimmed host.
pub fn validate_target_host(host: &str) -> Result<String> {
    let host = host.trim().to_ascii_lowercase();
    if host.is_empty() {
        return Err(Error::malformed("empty target host"));
    }

    let ok = host
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b':' | b'[' | b']'));
    if !ok {
        return Err(Error::malformed(format!("invalid target host: {}", host)));
    }

    Ok(host)
}

/// Validate a tunnel target port (1..=65535).
pub fn validate_target_port(port: &str) -> Result<u16> {
    match port.trim().parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(Error::malformed(format!("invalid target port: {}", port))),
    }
}

/// Parse a relay address of the form `host[:port]`, falling back to
/// `default_port` when no port is given. Bracketed IPv6 literals are
/// supported (`[::1]:443`).
pub fn parse_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(Error::parse("empty address"));
    }

    // Bracketed IPv6: [addr] or [addr]:port
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::parse(format!("unterminated IPv6 literal: {}", addr)))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| Error::parse(format!("invalid port in {}", addr)))?,
            None if tail.is_empty() => default_port,
            None => return Err(Error::parse(format!("trailing junk in {}", addr))),
        };
        return Ok((host.to_string(), port));
    }

    // A lone colon separates host from port; more than one without brackets
    // means a bare IPv6 literal.
    let colons = addr.bytes().filter(|b| *b == b':').count();
    if colons == 1 {
        let (host, port) = addr.split_once(':').unwrap_or((addr, ""));
        let port = port
            .parse()
            .map_err(|_| Error::parse(format!("invalid port in {}", addr)))?;
        return Ok((host.to_string(), port));
    }

    Ok((addr.to_string(), default_port))
}

/// Open a TCP connection to `host:port` with the standard socket options.
///
/// `host` may be a domain, an IP literal, or a bracketed IPv6 literal.
pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    let stream = if let Ok(ip) = bare.parse::<IpAddr>() {
        timeout(CONNECT_TIMEOUT, TcpStream::connect(SocketAddr::new(ip, port))).await
    } else {
        timeout(CONNECT_TIMEOUT, TcpStream::connect((bare, port))).await
    }
    .map_err(|_| Error::timeout(format!("connect to {}:{} timed out", host, port)))?
    .map_err(|e| Error::connect(format!("{}:{}: {}", host, port, e)))?;

    configure_tcp_stream(&stream);
    Ok(stream)
}
