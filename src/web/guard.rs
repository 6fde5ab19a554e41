//! Webhook request authentication.
//!
//! Inbound chat commands carry a timestamp header and an HMAC-SHA256
//! signature over `v0:<timestamp>:<raw body>`. Verification is fail-closed:
//! missing headers, a stale timestamp, or a signature mismatch all drop the
//! request before any command parsing happens.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "X-Slack-Request-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Slack-Signature";

/// Full check for one inbound request.
pub fn check(secret: &str, window: Duration, headers: &HeaderMap, body: &str) -> bool {
    let Some(timestamp) = header_str(headers, TIMESTAMP_HEADER) else {
        return false;
    };
    let Some(signature) = header_str(headers, SIGNATURE_HEADER) else {
        return false;
    };

    timestamp_is_fresh(timestamp, window) && verify_signature(secret, timestamp, body, signature)
}

/// Constant-time comparison of the `v0=<hex>` signature header against the
/// locally computed HMAC.
pub fn verify_signature(secret: &str, timestamp: &str, body: &str, signature: &str) -> bool {
    let Some(provided) = signature.strip_prefix("v0=") else {
        return false;
    };
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC takes any key length");
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Replayed requests are rejected: the signed timestamp must sit within the
/// freshness window around now.
pub fn timestamp_is_fresh(timestamp: &str, window: Duration) -> bool {
    let Ok(stamped) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);

    (now - stamped).abs() <= window.as_secs() as i64
}

/// Best available name for the peer: proxy headers first, since the service
/// normally sits behind one.
pub fn remote_host(headers: &HeaderMap) -> String {
    for name in ["X-Real-IP", "X-Forwarded-For"] {
        if let Some(value) = header_str(headers, name) {
            return value.to_string();
        }
    }
    "unknown".to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{timestamp}:{body}").as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_passes() {
        let sig = sign("secret", "1700000000", "text=status");
        assert!(verify_signature("secret", "1700000000", "text=status", &sig));
    }

    #[test]
    fn tampered_body_fails() {
        let sig = sign("secret", "1700000000", "text=status");
        assert!(!verify_signature("secret", "1700000000", "text=stop", &sig));
    }

    #[test]
    fn wrong_prefix_or_hex_fails() {
        assert!(!verify_signature("secret", "1", "body", "v1=abcd"));
        assert!(!verify_signature("secret", "1", "body", "v0=not-hex"));
    }

    #[test]
    fn freshness_window_is_enforced() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert!(timestamp_is_fresh(&now.to_string(), Duration::from_secs(60)));
        assert!(!timestamp_is_fresh(
            &(now - 3600).to_string(),
            Duration::from_secs(60)
        ));
        assert!(!timestamp_is_fresh("yesterday", Duration::from_secs(60)));
    }

    #[test]
    fn full_check_requires_both_headers() {
        let headers = HeaderMap::new();
        assert!(!check("secret", Duration::from_secs(60), &headers, "body"));
    }
}
