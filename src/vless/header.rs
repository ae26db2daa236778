//! VLESS request header parsing
//!
//! The request frame is
//! `version(1) · uuid(16) · addonLen(1) · addon(addonLen) · command(1) ·
//! port(2 BE) · addrType(1) · addr(var) · payload(rest)`.
//! Every field is bounds-checked against the buffer; anything out of range
//! is a typed malformed error so garbage never reaches the connect path.

use crate::common::ByteReader;
use crate::Error;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error as ThisError;
use uuid::Uuid;

/// Minimum wire size of a request frame
pub const MIN_HEADER_LEN: usize = 24;

/// Why a header failed to parse
#[derive(Debug, ThisError, PartialEq, Eq, Clone)]
pub enum HeaderError {
    #[error("insufficient length")]
    InsufficientLength,

    #[error("truncated at {0}")]
    Truncated(&'static str),

    #[error("unsupported command {0}")]
    UnsupportedCommand(u8),

    #[error("invalid address type {0}")]
    InvalidAddressType(u8),

    #[error("insufficient data for IPv4 address")]
    TruncatedIpv4,

    #[error("insufficient data for domain address")]
    TruncatedDomain,

    #[error("insufficient data for IPv6 address")]
    TruncatedIpv6,

    #[error("invalid domain encoding")]
    InvalidDomain,
}

impl From<HeaderError> for Error {
    fn from(e: HeaderError) -> Self {
        Error::Malformed(e.to_string())
    }
}

/// Tunnel command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Tcp = 0x01,
    Udp = 0x02,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Tcp => write!(f, "tcp"),
            Command::Udp => write!(f, "udp"),
        }
    }
}

/// Destination address as encoded in the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl TargetAddr {
    /// Host string suitable for dialing (IPv6 without brackets).
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ipv4(ip) => ip.to_string(),
            TargetAddr::Domain(d) => d.clone(),
            TargetAddr::Ipv6(ip) => ip.to_string(),
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(d) => write!(f, "{}", d),
            TargetAddr::Ipv6(ip) => write!(f, "[{}]", ip),
        }
    }
}

/// Parsed request header
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub uuid: Uuid,
    pub command: Command,
    pub port: u16,
    pub addr: TargetAddr,
    /// Offset of the first payload byte within the parsed buffer
    pub payload_offset: usize,
}

impl Header {
    /// Parse a request header from the first client chunk.
    pub fn parse(buf: &[u8]) -> Result<Header, HeaderError> {
        if buf.len() < MIN_HEADER_LEN {
            return Err(HeaderError::InsufficientLength);
        }

        let mut reader = ByteReader::new(buf);

        let version = reader.read_u8().ok_or(HeaderError::Truncated("version"))?;

        let uuid_bytes = reader.take(16).ok_or(HeaderError::Truncated("uuid"))?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(uuid_bytes);
        let uuid = Uuid::from_bytes(raw);

        // Addon section is length-skipped, never interpreted
        let addon_len = reader.read_u8().ok_or(HeaderError::Truncated("addon length"))? as usize;
        reader.take(addon_len).ok_or(HeaderError::Truncated("addon"))?;

        let command = match reader.read_u8().ok_or(HeaderError::Truncated("command"))? {
            0x01 => Command::Tcp,
            0x02 => Command::Udp,
            other => return Err(HeaderError::UnsupportedCommand(other)),
        };

        let port = reader.read_u16_be().ok_or(HeaderError::Truncated("port"))?;

        let addr_type = reader
            .read_u8()
            .ok_or(HeaderError::Truncated("address type"))?;
        let addr = match addr_type {
            0x01 => {
                let octets = reader.take(4).ok_or(HeaderError::TruncatedIpv4)?;
                TargetAddr::Ipv4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
            }
            0x02 => {
                let len = reader
                    .read_u8()
                    .ok_or(HeaderError::Truncated("domain length"))? as usize;
                let name = reader.take(len).ok_or(HeaderError::TruncatedDomain)?;
                let name =
                    std::str::from_utf8(name).map_err(|_| HeaderError::InvalidDomain)?;
                TargetAddr::Domain(name.to_string())
            }
            0x03 => {
                let octets = reader.take(16).ok_or(HeaderError::TruncatedIpv6)?;
                let mut raw = [0u8; 16];
                raw.copy_from_slice(octets);
                TargetAddr::Ipv6(Ipv6Addr::from(raw))
            }
            other => return Err(HeaderError::InvalidAddressType(other)),
        };

        Ok(Header {
            version,
            uuid,
            command,
            port,
            addr,
            payload_offset: reader.position(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    fn build(command: u8, port: u16, addr: &[u8], payload: &[u8]) -> Vec<u8> {
        let uuid = Uuid::parse_str(UUID).unwrap();
        let mut buf = vec![0x00];
        buf.extend_from_slice(uuid.as_bytes());
        buf.push(0x00); // addon length
        buf.push(command);
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(addr);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_too_short() {
        for len in 0..MIN_HEADER_LEN {
            let buf = vec![0u8; len];
            assert_eq!(
                Header::parse(&buf).unwrap_err(),
                HeaderError::InsufficientLength,
                "len {}",
                len
            );
        }
    }

    #[test]
    fn test_tcp_ipv4() {
        let payload = b"\x16\x03\x01\x00\x01";
        let buf = build(0x01, 443, &[0x01, 1, 2, 3, 4], payload);
        let header = Header::parse(&buf).unwrap();

        assert_eq!(header.version, 0x00);
        assert_eq!(header.uuid.to_string(), UUID);
        assert_eq!(header.command, Command::Tcp);
        assert_eq!(header.port, 443);
        assert_eq!(header.addr, TargetAddr::Ipv4(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(header.payload_offset, buf.len() - payload.len());
        assert_eq!(&buf[header.payload_offset..], payload);
    }

    #[test]
    fn test_ipv4_at_exact_buffer_end() {
        // No payload: address ends exactly at the buffer boundary
        let buf = build(0x01, 80, &[0x01, 10, 0, 0, 1], b"");
        let header = Header::parse(&buf).unwrap();
        assert_eq!(header.payload_offset, buf.len());
    }

    #[test]
    fn test_ipv4_one_byte_short() {
        let buf = build(0x01, 80, &[0x01, 10, 0, 0], b"");
        assert_eq!(Header::parse(&buf).unwrap_err(), HeaderError::TruncatedIpv4);
        assert_eq!(
            HeaderError::TruncatedIpv4.to_string(),
            "insufficient data for IPv4 address"
        );
    }

    #[test]
    fn test_domain() {
        let buf = build(0x01, 443, b"\x02\x0bexample.com", b"hello");
        let header = Header::parse(&buf).unwrap();
        assert_eq!(
            header.addr,
            TargetAddr::Domain("example.com".to_string())
        );
        assert_eq!(header.addr.to_string(), "example.com");
    }

    #[test]
    fn test_domain_empty() {
        // Zero-length FQDN is accepted as the empty string; pad with
        // payload to stay above the minimum frame size.
        let buf = build(0x01, 443, &[0x02, 0x00], b"xx");
        let header = Header::parse(&buf).unwrap();
        assert_eq!(header.addr, TargetAddr::Domain(String::new()));
    }

    #[test]
    fn test_ipv6() {
        let ip: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let mut addr = vec![0x03];
        addr.extend_from_slice(&ip.octets());
        let buf = build(0x01, 8443, &addr, b"");
        let header = Header::parse(&buf).unwrap();
        assert_eq!(header.addr, TargetAddr::Ipv6(ip));
        assert_eq!(header.addr.to_string(), "[2001:db8::1]");
        assert_eq!(header.addr.host(), "2001:db8::1");
    }

    #[test]
    fn test_udp_command() {
        let buf = build(0x02, 53, &[0x01, 8, 8, 8, 8], b"");
        let header = Header::parse(&buf).unwrap();
        assert_eq!(header.command, Command::Udp);
        assert_eq!(header.port, 53);
    }

    #[test]
    fn test_unsupported_command() {
        let buf = build(0x03, 443, &[0x01, 1, 2, 3, 4], b"");
        assert_eq!(
            Header::parse(&buf).unwrap_err(),
            HeaderError::UnsupportedCommand(0x03)
        );
    }

    #[test]
    fn test_invalid_address_type() {
        let buf = build(0x01, 443, &[0x04, 1, 2, 3, 4], b"");
        assert_eq!(
            Header::parse(&buf).unwrap_err(),
            HeaderError::InvalidAddressType(0x04)
        );
    }

    #[test]
    fn test_truncated_addon() {
        let uuid = Uuid::parse_str(UUID).unwrap();
        let mut buf = vec![0x00];
        buf.extend_from_slice(uuid.as_bytes());
        buf.push(0xff); // claims 255 addon bytes
        buf.extend_from_slice(&[0u8; 8]);
        assert_eq!(
            Header::parse(&buf).unwrap_err(),
            HeaderError::Truncated("addon")
        );
    }

    #[test]
    fn test_uuid_roundtrip() {
        let uuid = Uuid::parse_str(UUID).unwrap();
        assert_eq!(Uuid::from_bytes(*uuid.as_bytes()).to_string(), UUID);
    }
}
