//! Early-data decoding
//!
//! Clients may smuggle the first bytes of a tunnel into the
//! `Sec-WebSocket-Protocol` request header as URL-safe base64, saving a
//! round trip before the first WebSocket frame.

use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;

/// Decode a URL-safe base64 header value into raw early-data bytes.
///
/// Both padded and unpadded forms are accepted; an empty value yields
/// `None` rather than an empty chunk.
pub fn decode_early_data(value: &str) -> Result<Option<Bytes>> {
    let trimmed = value.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return Ok(None);
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| Error::malformed(format!("invalid early data: {}", e)))?;

    Ok(Some(Bytes::from(decoded)))
}
