//! Basic-Auth check for the tunnel surface and `/info`
//!
//! Clients send either the bare shared secret after `Basic `, or standard
//! `base64(user:password)` credentials whose password is the secret.
//! Comparisons are constant-time.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::HeaderValue;
use subtle::ConstantTimeEq;

pub fn authorize_basic(header: Option<&HeaderValue>, secret: &str) -> bool {
    // No secret configured means authentication is disabled
    if secret.is_empty() {
        return true;
    }

    let Some(value) = header.and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(token) = value.strip_prefix("Basic ") else {
        return false;
    };
    let token = token.trim();

    if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
        return true;
    }

    // base64(user:password) form
    if let Ok(decoded) = STANDARD.decode(token) {
        if let Ok(credentials) = String::from_utf8(decoded) {
            if let Some((_user, password)) = credentials.split_once(':') {
                return constant_time_eq(password.as_bytes(), secret.as_bytes());
            }
        }
    }

    false
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn test_raw_token() {
        let h = header("Basic sekrit");
        assert!(authorize_basic(Some(&h), "sekrit"));
        assert!(!authorize_basic(Some(&h), "other"));
    }

    #[test]
    fn test_user_pass_form() {
        let token = STANDARD.encode("operator:sekrit");
        let h = header(&format!("Basic {}", token));
        assert!(authorize_basic(Some(&h), "sekrit"));
        assert!(!authorize_basic(Some(&h), "wrong"));
    }

    #[test]
    fn test_missing_or_malformed() {
        assert!(!authorize_basic(None, "sekrit"));
        let h = header("Bearer sekrit");
        assert!(!authorize_basic(Some(&h), "sekrit"));
    }

    #[test]
    fn test_empty_secret_disables_auth() {
        assert!(authorize_basic(None, ""));
        let h = header("Basic anything");
        assert!(authorize_basic(Some(&h), ""));
    }
}
