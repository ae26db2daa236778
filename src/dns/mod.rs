//! DNS-over-HTTPS client
//!
//! DNS queries are relayed as the body of an HTTPS POST with content type
//! `application/dns-message`; the response body is the DNS wire-format
//! answer.

use crate::{Error, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DOH_CONTENT_TYPE: &str = "application/dns-message";
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared DoH client. Cheap to clone; connections are pooled underneath.
#[derive(Clone)]
pub struct DohClient {
    http: reqwest::Client,
}

impl DohClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("DoH client: {}", e)))?;
        Ok(DohClient { http })
    }

    /// Send one DNS wire-format query, returning the wire-format answer.
    ///
    /// Non-2xx statuses and empty bodies are upstream errors; the caller
    /// decides whether they are fatal (for the UDP engine they are not).
    pub async fn query(&self, url: &Url, query: Bytes) -> Result<Bytes> {
        let response = self
            .http
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, DOH_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, DOH_CONTENT_TYPE)
            .body(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(format!("DoH status {}", status)));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(Error::upstream("DoH returned empty body"));
        }

        debug!("DoH answer: {} bytes", body.len());
        Ok(body)
    }
}
