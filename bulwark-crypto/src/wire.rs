//! Self-describing ciphertext envelopes.
//!
//! Envelope formats by algorithm family (ASCII, lowercase hex):
//!
//! ```text
//! AES-CBC / AES-GCM   <iv_hex> ":" <ciphertext_hex>
//! RSA                 <ciphertext_hex>
//! ECC hybrid          <ephemeral_point_hex> ":" <iv_hex> ":" <ciphertext_hex>
//! ```
//!
//! Parsing is strict: a wrong segment count, an empty segment, or non-hex
//! content is rejected. No heuristic recovery.

use std::fmt;

use crate::error::PrimitiveError;

pub const SEGMENT_SEPARATOR: char = ':';

/// Uniform envelope parse failure. Carries no detail about which
/// segment offended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeError;

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed envelope")
    }
}

impl std::error::Error for EnvelopeError {}

impl From<PrimitiveError> for EnvelopeError {
    fn from(_: PrimitiveError) -> Self {
        EnvelopeError
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, EnvelopeError> {
    if segment.is_empty() {
        return Err(EnvelopeError);
    }
    hex::decode(segment).map_err(|_| EnvelopeError)
}

/// Encode an AES envelope (`iv:ciphertext`). Also used for GCM with a
/// 12-byte nonce in the IV position.
pub fn encode_aes(iv: &[u8], ciphertext: &[u8]) -> String {
    format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
}

/// Parse an AES envelope. `iv_len` is 16 for CBC and 12 for GCM.
pub fn parse_aes(envelope: &str, iv_len: usize) -> Result<(Vec<u8>, Vec<u8>), EnvelopeError> {
    let mut segments = envelope.split(SEGMENT_SEPARATOR);
    let iv = decode_segment(segments.next().ok_or(EnvelopeError)?)?;
    let ciphertext = decode_segment(segments.next().ok_or(EnvelopeError)?)?;
    if segments.next().is_some() {
        return Err(EnvelopeError);
    }
    if iv.len() != iv_len {
        return Err(EnvelopeError);
    }
    Ok((iv, ciphertext))
}

/// Encode an RSA envelope (bare hex, no separator).
pub fn encode_rsa(ciphertext: &[u8]) -> String {
    hex::encode(ciphertext)
}

/// Parse an RSA envelope: exactly one segment.
pub fn parse_rsa(envelope: &str) -> Result<Vec<u8>, EnvelopeError> {
    if envelope.contains(SEGMENT_SEPARATOR) {
        return Err(EnvelopeError);
    }
    decode_segment(envelope)
}

/// Encode a hybrid ECC envelope (`ephemeral_point:iv:ciphertext`).
pub fn encode_ecc(ephemeral_point: &[u8], iv: &[u8], ciphertext: &[u8]) -> String {
    format!(
        "{}:{}:{}",
        hex::encode(ephemeral_point),
        hex::encode(iv),
        hex::encode(ciphertext)
    )
}

/// Parse a hybrid ECC envelope: exactly three segments.
pub fn parse_ecc(envelope: &str) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), EnvelopeError> {
    let mut segments = envelope.split(SEGMENT_SEPARATOR);
    let point = decode_segment(segments.next().ok_or(EnvelopeError)?)?;
    let iv = decode_segment(segments.next().ok_or(EnvelopeError)?)?;
    let ciphertext = decode_segment(segments.next().ok_or(EnvelopeError)?)?;
    if segments.next().is_some() {
        return Err(EnvelopeError);
    }
    if iv.len() != crate::cipher::IV_BYTES {
        return Err(EnvelopeError);
    }
    Ok((point, iv, ciphertext))
}
