//! Payment webhook signatures
//!
//! The provider sends `payment-signature: t=<unix seconds>,v1=<hex>` where
//! the MAC is HMAC-SHA256 over `"{t}.{raw body}"`. Several `v1` entries may
//! be present while the provider rotates secrets; any one matching is enough.

use crate::security::clock::Clock;
use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "payment-signature";

const SCHEME: &str = "v1";

/// Parsed form of the signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: u64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                return Err(Error::signature("malformed signature header"));
            };

            match key {
                "t" => {
                    let parsed = value
                        .parse::<u64>()
                        .map_err(|_| Error::signature("invalid signature timestamp"))?;
                    timestamp = Some(parsed);
                }
                SCHEME => {
                    // Undecodable entries are ignored like unknown schemes
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| Error::signature("missing signature timestamp"))?;
        if signatures.is_empty() {
            return Err(Error::signature("no v1 signature in header"));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn mac_for(secret: &str, timestamp: u64, body: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::signature("invalid webhook secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Build a header value for `body` signed with `secret` at `timestamp`
pub fn sign_payload(secret: &str, timestamp: u64, body: &[u8]) -> Result<String> {
    let signature = mac_for(secret, timestamp, body)?.finalize().into_bytes();
    Ok(format!("t={timestamp},{SCHEME}={}", hex::encode(signature)))
}

/// Verifies webhook signatures against one secret
pub struct SignatureVerifier {
    secret: String,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
            clock,
        }
    }

    /// Check `header` against `body`. Fails on a missing or malformed
    /// header, a timestamp outside the tolerance, or no matching MAC.
    pub fn verify(&self, header: Option<&str>, body: &[u8]) -> Result<()> {
        let header = header.ok_or_else(|| Error::signature("missing signature header"))?;
        let parsed = SignatureHeader::parse(header)?;

        let now_secs = self.clock.now_millis() / 1000;
        if now_secs.abs_diff(parsed.timestamp) > self.tolerance.as_secs() {
            return Err(Error::signature("timestamp outside tolerance"));
        }

        for candidate in &parsed.signatures {
            // verify_slice compares in constant time
            if mac_for(&self.secret, parsed.timestamp, body)?
                .verify_slice(candidate)
                .is_ok()
            {
                return Ok(());
            }
        }

        Err(Error::signature("no matching signature"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;

    const SECRET: &str = "whsec_test_secret";
    const NOW_SECS: u64 = 1_700_000_000;

    fn verifier() -> (SignatureVerifier, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW_SECS * 1000));
        (
            SignatureVerifier::new(SECRET, Duration::from_secs(300), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_signed_payload_verifies() {
        let (verifier, _) = verifier();
        let body = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

        let header = sign_payload(SECRET, NOW_SECS, body).unwrap();
        assert!(header.starts_with("t=1700000000,v1="));
        assert!(verifier.verify(Some(&header), body).is_ok());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let (verifier, _) = verifier();
        let header = sign_payload(SECRET, NOW_SECS, b"{\"amount\":100}").unwrap();

        let err = verifier.verify(Some(&header), b"{\"amount\":1}").unwrap_err();
        assert!(matches!(err, Error::Signature { .. }));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let (verifier, _) = verifier();
        let header = sign_payload("whsec_other", NOW_SECS, b"{}").unwrap();
        assert!(verifier.verify(Some(&header), b"{}").is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let (verifier, clock) = verifier();
        let header = sign_payload(SECRET, NOW_SECS, b"{}").unwrap();

        clock.advance(Duration::from_secs(301));
        let err = verifier.verify(Some(&header), b"{}").unwrap_err();
        assert!(err.to_string().contains("tolerance"));
    }

    #[test]
    fn test_missing_and_malformed_headers() {
        let (verifier, _) = verifier();

        assert!(verifier.verify(None, b"{}").is_err());
        assert!(verifier.verify(Some("garbage"), b"{}").is_err());
        assert!(verifier.verify(Some("t=abc,v1=00"), b"{}").is_err());
        assert!(verifier.verify(Some("t=1700000000"), b"{}").is_err());
        assert!(verifier.verify(Some("v1=00ff"), b"{}").is_err());
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let (verifier, _) = verifier();
        let valid = sign_payload(SECRET, NOW_SECS, b"{}").unwrap();
        let valid_sig = valid.split_once(",v1=").unwrap().1;

        let header = format!("t={NOW_SECS},v1=00112233,v0=legacy,v1={valid_sig}");
        assert!(verifier.verify(Some(&header), b"{}").is_ok());
    }
}
