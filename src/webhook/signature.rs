use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

fn mac(secret: &str, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::WebhookVerification(format!("Invalid HMAC key: {e}")))?;
    mac.update(payload);
    Ok(mac)
}

/// `X-Hub-Signature-256` header value for `payload`.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String> {
    let digest = mac(secret, payload)?.finalize().into_bytes();
    Ok(format!("{PREFIX}{}", hex::encode(digest)))
}

/// Check a delivery against its `X-Hub-Signature-256` header in constant time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> Result<()> {
    let signature_hex = signature_header
        .strip_prefix(PREFIX)
        .ok_or_else(|| AppError::WebhookVerification("Missing sha256= prefix".to_string()))?;

    let expected = hex::decode(signature_hex)
        .map_err(|e| AppError::WebhookVerification(format!("Invalid hex in signature: {e}")))?;

    mac(secret, payload)?
        .verify_slice(&expected)
        .map_err(|_| AppError::WebhookVerification("Signature mismatch".to_string()))
}

/// Compare a presented bearer token with the configured one in constant time.
///
/// Both sides are reduced to fixed-length MACs first, so neither the
/// contents nor the length of `expected` leak through timing.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    let Ok(reference) = mac(expected, expected.as_bytes()) else {
        return false;
    };
    let reference = reference.finalize().into_bytes();
    mac(expected, presented.as_bytes())
        .map(|m| m.verify_slice(&reference).is_ok())
        .unwrap_or(false)
}
