use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::billing::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOLERANCE_SECONDS: u64 = 300;

/// Authenticates inbound webhook deliveries against the shared signing secret.
///
/// The `Stripe-Signature` header has the shape `t=<unix>,v1=<hex>[,v1=<hex>...]`;
/// several `v1` entries appear while a secret is being rolled. Any other scheme
/// (`v0`, ...) is ignored.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_seconds: u64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance_seconds", &self.tolerance_seconds)
            .finish()
    }
}

struct ParsedHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Option<ParsedHeader<'_>> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = Some(value.parse::<i64>().ok()?),
            "v1" => signatures.push(value),
            _ => {}
        }
    }
    if signatures.is_empty() {
        return None;
    }
    Some(ParsedHeader {
        timestamp: timestamp?,
        signatures,
    })
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_seconds: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_seconds,
        }
    }

    fn expected_signature(&self, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Produces a header value the way the processor signs deliveries.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        Ok(format!(
            "t={},v1={}",
            timestamp,
            self.expected_signature(timestamp, payload)?
        ))
    }

    /// Checks the signature first and freshness second, so a forged header
    /// always reports `InvalidSignature`. Timestamps ahead of `now` are
    /// accepted.
    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: OffsetDateTime,
    ) -> Result<(), WebhookError> {
        let parsed = parse_header(header).ok_or(WebhookError::InvalidSignature)?;
        let expected = self.expected_signature(parsed.timestamp, payload)?;

        let matched = parsed
            .signatures
            .iter()
            .fold(0u8, |acc, candidate| {
                acc | expected.as_bytes().ct_eq(candidate.as_bytes()).unwrap_u8()
            });
        if matched != 1 {
            return Err(WebhookError::InvalidSignature);
        }

        let age = now.unix_timestamp().saturating_sub(parsed.timestamp);
        if u64::try_from(age).is_ok_and(|age| age > self.tolerance_seconds) {
            return Err(WebhookError::StaleEvent);
        }
        Ok(())
    }
}
