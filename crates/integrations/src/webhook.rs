//! Inbound webhook signature verification.
//!
//! Callbacks arrive signed svix-style: `svix-id`, `svix-timestamp` and
//! `svix-signature` headers, where the signature is base64(HMAC-SHA256 over
//! `"{id}.{timestamp}.{payload}"`). The secret is base64 behind a `whsec_`
//! prefix. Verification is constant-time and rejects timestamps skewed more
//! than the tolerance window in either direction.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Replay window: timestamps outside ±300 s are rejected.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Payloads above this size are rejected before any crypto work.
pub const MAX_WEBHOOK_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook secret is malformed")]
    InvalidSecret,

    #[error("payload exceeds {MAX_WEBHOOK_PAYLOAD_BYTES} bytes")]
    PayloadTooLarge,

    #[error("timestamp is malformed")]
    InvalidTimestamp,

    #[error("timestamp outside the tolerance window")]
    TimestampSkew,

    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Verifies signed webhook payloads.
#[derive(Clone, Debug)]
pub struct WebhookVerifier {
    key: Vec<u8>,
    tolerance_secs: i64,
    max_payload_bytes: usize,
}

impl WebhookVerifier {
    /// Build a verifier from the provider-issued secret (`whsec_<base64>`;
    /// a bare base64 key is also accepted).
    pub fn new(secret: &str) -> Result<Self, WebhookError> {
        let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
        let key = BASE64
            .decode(encoded)
            .map_err(|_| WebhookError::InvalidSecret)?;
        if key.is_empty() {
            return Err(WebhookError::InvalidSecret);
        }

        Ok(Self {
            key,
            tolerance_secs: TIMESTAMP_TOLERANCE_SECS,
            max_payload_bytes: MAX_WEBHOOK_PAYLOAD_BYTES,
        })
    }

    #[cfg(test)]
    fn with_tolerance(mut self, secs: i64) -> Self {
        self.tolerance_secs = secs;
        self
    }

    /// Verify one inbound delivery.
    ///
    /// `timestamp` is the raw header value (unix seconds); `signatures` is
    /// the raw `svix-signature` header, a space-separated list of
    /// `v1,<base64>` entries (any one matching accepts the delivery).
    pub fn verify(
        &self,
        id: &str,
        timestamp: &str,
        signatures: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        if payload.len() > self.max_payload_bytes {
            return Err(WebhookError::PayloadTooLarge);
        }

        let ts_secs: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookError::InvalidTimestamp)?;
        let ts = Utc
            .timestamp_opt(ts_secs, 0)
            .single()
            .ok_or(WebhookError::InvalidTimestamp)?;

        let skew = (now - ts).num_seconds();
        if skew.abs() > self.tolerance_secs {
            return Err(WebhookError::TimestampSkew);
        }

        let mut accepted = false;
        for candidate in signatures.split_whitespace() {
            let Some(encoded) = candidate.strip_prefix("v1,") else {
                continue;
            };
            let Ok(provided) = BASE64.decode(encoded) else {
                continue;
            };

            // `hmac` verifies in constant time.
            let mut mac = HmacSha256::new_from_slice(&self.key)
                .map_err(|_| WebhookError::InvalidSecret)?;
            mac.update(id.as_bytes());
            mac.update(b".");
            mac.update(timestamp.trim().as_bytes());
            mac.update(b".");
            mac.update(payload);
            if mac.verify_slice(&provided).is_ok() {
                accepted = true;
            }
        }

        if accepted {
            Ok(())
        } else {
            Err(WebhookError::SignatureMismatch)
        }
    }

    /// Compute the `v1,<base64>` signature for a delivery (outbound + tests).
    pub fn sign(&self, id: &str, timestamp: &str, payload: &[u8]) -> Result<String, WebhookError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| WebhookError::InvalidSecret)?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.trim().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let bytes = mac.finalize().into_bytes();
        Ok(format!("v1,{}", BASE64.encode(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> WebhookVerifier {
        // "whsec_" + base64("super-secret-signing-key")
        let secret = format!("whsec_{}", BASE64.encode(b"super-secret-signing-key"));
        WebhookVerifier::new(&secret).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
    }

    #[test]
    fn accepts_a_valid_signature_within_the_window() {
        let v = verifier();
        let ts = now().timestamp().to_string();
        let payload = br#"{"event":"message.received"}"#;
        let sig = v.sign("msg_1", &ts, payload).unwrap();

        assert!(v.verify("msg_1", &ts, &sig, payload, now()).is_ok());
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let v = verifier();
        let stale = (now().timestamp() - TIMESTAMP_TOLERANCE_SECS - 1).to_string();
        let payload = b"{}";
        let sig = v.sign("msg_1", &stale, payload).unwrap();

        assert_eq!(
            v.verify("msg_1", &stale, &sig, payload, now()),
            Err(WebhookError::TimestampSkew)
        );
    }

    #[test]
    fn rejects_a_future_timestamp_beyond_tolerance() {
        let v = verifier();
        let future = (now().timestamp() + TIMESTAMP_TOLERANCE_SECS + 1).to_string();
        let payload = b"{}";
        let sig = v.sign("msg_1", &future, payload).unwrap();

        assert_eq!(
            v.verify("msg_1", &future, &sig, payload, now()),
            Err(WebhookError::TimestampSkew)
        );
    }

    #[test]
    fn rejects_a_tampered_body() {
        let v = verifier();
        let ts = now().timestamp().to_string();
        let sig = v.sign("msg_1", &ts, b"{\"amount\":10}").unwrap();

        assert_eq!(
            v.verify("msg_1", &ts, &sig, b"{\"amount\":9999}", now()),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn rejects_a_signature_for_another_delivery_id() {
        let v = verifier();
        let ts = now().timestamp().to_string();
        let payload = b"{}";
        let sig = v.sign("msg_1", &ts, payload).unwrap();

        assert_eq!(
            v.verify("msg_2", &ts, &sig, payload, now()),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn accepts_any_matching_signature_from_the_list() {
        let v = verifier();
        let ts = now().timestamp().to_string();
        let payload = b"{}";
        let good = v.sign("msg_1", &ts, payload).unwrap();
        let header = format!("v1,AAAA {good}");

        assert!(v.verify("msg_1", &ts, &header, payload, now()).is_ok());
    }

    #[test]
    fn rejects_oversized_payloads_before_verifying() {
        let v = verifier();
        let ts = now().timestamp().to_string();
        let payload = vec![0u8; MAX_WEBHOOK_PAYLOAD_BYTES + 1];
        let sig = v.sign("msg_1", &ts, &payload).unwrap();

        assert_eq!(
            v.verify("msg_1", &ts, &sig, &payload, now()),
            Err(WebhookError::PayloadTooLarge)
        );
    }

    #[test]
    fn rejects_garbage_secrets() {
        assert_eq!(
            WebhookVerifier::new("whsec_!!!").unwrap_err(),
            WebhookError::InvalidSecret
        );
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let v = verifier().with_tolerance(10);
        let ts = (now().timestamp() - 10).to_string();
        let payload = b"{}";
        let sig = v.sign("msg_1", &ts, payload).unwrap();

        assert!(v.verify("msg_1", &ts, &sig, payload, now()).is_ok());
    }
}
