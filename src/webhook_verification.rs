//! # Webhook Signature Verification
//!
//! Pipedrive deliveries are signed with `X-Pipenotify-Signature:
//! sha256=<hex>`, an HMAC-SHA256 of the raw body keyed with the tenant's
//! secret or, when the tenant has none, the global shared secret.
//! Comparison is constant time.

use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

pub const SIGNATURE_HEADER: &str = "x-pipenotify-signature";

const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Webhook verification not configured")]
    NotConfigured,
}

impl VerificationError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// Picks the secret a request must be signed with.
pub fn resolve_secret<'a>(
    tenant_secret: Option<&'a str>,
    shared_secret: Option<&'a str>,
) -> Option<&'a str> {
    tenant_secret
        .filter(|secret| !secret.is_empty())
        .or(shared_secret.filter(|secret| !secret.is_empty()))
}

fn body_mac(body: &[u8], secret: &str) -> VerificationResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    Ok(mac)
}

/// `sha256=<hex>` signature of `body`.
pub fn compute_signature(body: &[u8], secret: &str) -> VerificationResult<String> {
    let digest = body_mac(body, secret)?.finalize().into_bytes();
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
}

/// Verifies a `sha256=<hex>` signature header against `body`.
pub fn verify_signature(body: &[u8], signature_header: &str, secret: &str) -> VerificationResult<()> {
    debug!(body_size = body.len(), "Verifying webhook signature");

    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: SIGNATURE_HEADER.to_string(),
        });
    }

    let provided_hex = signature_header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| VerificationError::InvalidSignatureFormat {
            reason: format!("{SIGNATURE_HEADER} must start with '{SIGNATURE_PREFIX}'"),
        })?;

    let provided_bytes =
        hex::decode(provided_hex.trim()).map_err(|_| VerificationError::InvalidSignatureFormat {
            reason: format!("{SIGNATURE_HEADER} contains invalid hex"),
        })?;

    let expected_bytes = body_mac(body, secret)?.finalize().into_bytes();

    let expected: &[u8] = expected_bytes.as_ref();
    if subtle::ConstantTimeEq::ct_eq(expected, &provided_bytes[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Verifies an inbound request with whichever secret applies.
pub fn verify_request(
    body: &[u8],
    headers: &HeaderMap,
    tenant_secret: Option<&str>,
    shared_secret: Option<&str>,
) -> VerificationResult<()> {
    let secret =
        resolve_secret(tenant_secret, shared_secret).ok_or(VerificationError::NotConfigured)?;

    let signature_header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    verify_signature(body, signature_header, secret)
}
