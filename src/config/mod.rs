//! Configuration module
//!
//! All options come from the environment with compiled defaults; the
//! `relay`, `doh`, and `log` URL query parameters override the
//! corresponding environment value for a single request.

use crate::{Error, Result};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Compiled-in defaults
pub const DEFAULT_USER_ID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";
pub const DEFAULT_DOH_URL: &str = "https://cloudflare-dns.com/dns-query";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 45;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARN" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            other => Err(Error::config(format!("unknown log level: {}", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        write!(f, "{}", s)
    }
}

impl LogLevel {
    /// Directive string for the tracing env-filter.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// VLESS client identity
    pub user_id: Uuid,
    /// Basic-Auth secret for `/info` and the TwoPass tunnel. Empty
    /// disables authentication.
    pub password: String,
    /// TCP fallback `host[:port]` used when the primary target goes silent
    pub relay_addr: Option<String>,
    /// DNS-over-HTTPS upstream
    pub doh_url: Url,
    /// Base log level
    pub log_level: LogLevel,
    /// Bind address for the HTTP listener
    pub listen: SocketAddr,
    /// Idle TTL for V2 tunnel sessions
    pub session_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            user_id: Uuid::parse_str(DEFAULT_USER_ID).expect("default user id"),
            password: String::new(),
            relay_addr: None,
            doh_url: Url::parse(DEFAULT_DOH_URL).expect("default DoH url"),
            log_level: LogLevel::Info,
            listen: DEFAULT_LISTEN_ADDR.parse().expect("default listen addr"),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(v) = env_var("USER_ID") {
            config.user_id = Uuid::parse_str(&v)
                .map_err(|e| Error::config(format!("invalid USER_ID: {}", e)))?;
        }
        if let Some(v) = env_var("PASSWORD") {
            config.password = v;
        }
        if let Some(v) = env_var("RELAY_ADDR") {
            config.relay_addr = Some(v);
        }
        if let Some(v) = env_var("DOH_URL") {
            config.doh_url = parse_doh_url(&v)?;
        }
        if let Some(v) = env_var("LOG_LEVEL") {
            config.log_level = v.parse()?;
        }
        if let Some(v) = env_var("LISTEN_ADDR") {
            config.listen = v
                .parse()
                .map_err(|e| Error::config(format!("invalid LISTEN_ADDR: {}", e)))?;
        }
        if let Some(v) = env_var("SESSION_TTL_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|e| Error::config(format!("invalid SESSION_TTL_SECS: {}", e)))?;
            config.session_ttl = Duration::from_secs(secs.max(1));
        }

        Ok(config)
    }

    /// Build the request-scoped view, applying URL query overrides.
    pub fn for_request(&self, query: Option<&str>) -> RequestConfig {
        let mut request = RequestConfig {
            user_id: self.user_id,
            password: self.password.clone(),
            relay_addr: self.relay_addr.clone(),
            doh_url: self.doh_url.clone(),
            log_level: self.log_level,
        };

        let Some(query) = query else {
            return request;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "relay" if !value.is_empty() => {
                    request.relay_addr = Some(value.into_owned());
                }
                "doh" => {
                    if let Ok(url) = parse_doh_url(&value) {
                        request.doh_url = url;
                    }
                }
                "log" => {
                    if let Ok(level) = value.parse() {
                        request.log_level = level;
                    }
                }
                _ => {}
            }
        }

        request
    }
}

/// Immutable, request-scoped configuration view
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub user_id: Uuid,
    pub password: String,
    pub relay_addr: Option<String>,
    pub doh_url: Url,
    pub log_level: LogLevel,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_doh_url(value: &str) -> Result<Url> {
    let url =
        Url::parse(value).map_err(|e| Error::config(format!("invalid DoH URL: {}", e)))?;
    if url.scheme() != "https" {
        return Err(Error::config(format!("DoH URL must be https: {}", value)));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.user_id.to_string(), DEFAULT_USER_ID);
        assert_eq!(config.doh_url.as_str(), DEFAULT_DOH_URL);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.relay_addr.is_none());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" TRACE ".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_doh_url_must_be_https() {
        assert!(parse_doh_url("https://dns.example/dns-query").is_ok());
        assert!(parse_doh_url("http://dns.example/dns-query").is_err());
        assert!(parse_doh_url("not a url").is_err());
    }

    #[test]
    fn test_query_overrides() {
        let config = Config::default();
        let request =
            config.for_request(Some("relay=fallback.example.net:8443&log=debug"));
        assert_eq!(
            request.relay_addr.as_deref(),
            Some("fallback.example.net:8443")
        );
        assert_eq!(request.log_level, LogLevel::Debug);
        // doh untouched
        assert_eq!(request.doh_url, config.doh_url);
    }

    #[test]
    fn test_query_override_rejects_bad_values() {
        let config = Config::default();
        let request = config.for_request(Some("doh=http://insecure/dns&log=loud"));
        assert_eq!(request.doh_url, config.doh_url);
        assert_eq!(request.log_level, config.log_level);
    }

    #[test]
    fn test_no_query() {
        let config = Config::default();
        let request = config.for_request(None);
        assert_eq!(request.user_id, config.user_id);
    }
}
