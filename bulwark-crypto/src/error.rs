//! Error types for the primitive layer.

use std::fmt;

/// Uniform failure type for every primitive operation.
///
/// Variants are deliberately coarse: a caller learns that a key, a padding,
/// or a signature was bad, never which byte offended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveError {
    /// Wrong key length, malformed PEM, or a point not on the curve.
    BadKey,
    /// PKCS#7 or PKCS#1 padding did not verify on decryption.
    BadPadding,
    /// Signature or authentication tag did not verify.
    BadSignature,
    /// The operating system RNG failed.
    RngFailure,
}

impl fmt::Display for PrimitiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadKey => write!(f, "invalid key material"),
            Self::BadPadding => write!(f, "padding check failed"),
            Self::BadSignature => write!(f, "signature verification failed"),
            Self::RngFailure => write!(f, "random number generation failed"),
        }
    }
}

impl std::error::Error for PrimitiveError {}
