//! Error taxonomy for the core.

use std::fmt;

use bulwark_crypto::wire::EnvelopeError;
use bulwark_crypto::PrimitiveError;

use crate::types::KeyId;

/// Every failure a core operation can surface.
///
/// Propagation policy: cryptographic and input errors surface verbatim;
/// authorization denials are an opaque `NotAuthorized` regardless of cause;
/// internal errors cross the boundary as a generic failure, with details
/// only in the audit log. Display strings are sanitized: no key material,
/// plaintext, or PEM content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    // Input
    BadAlgorithm(String),
    InputTooLarge { len: usize, max: usize },
    MalformedEnvelope,
    MalformedBackup,

    // Authorization
    NotAuthenticated,
    NotAuthorized,

    // State
    KeyUnknown(KeyId),
    KeyNotActive(KeyId),
    NothingToBackUp,

    // Cryptographic
    BadPadding,
    BadSignature,
    RngFailure,

    // Internal
    PersistenceFailure(String),
    ConfigMissing(String),
}

impl CoreError {
    /// Short stable token written to audit `details.error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadAlgorithm(_) => "BadAlgorithm",
            Self::InputTooLarge { .. } => "InputTooLarge",
            Self::MalformedEnvelope => "MalformedEnvelope",
            Self::MalformedBackup => "MalformedBackup",
            Self::NotAuthenticated => "NotAuthenticated",
            Self::NotAuthorized => "NotAuthorized",
            Self::KeyUnknown(_) => "KeyUnknown",
            Self::KeyNotActive(_) => "KeyNotActive",
            Self::NothingToBackUp => "NothingToBackUp",
            Self::BadPadding => "BadPadding",
            Self::BadSignature => "BadSignature",
            Self::RngFailure => "RngFailure",
            Self::PersistenceFailure(_) => "PersistenceFailure",
            Self::ConfigMissing(_) => "ConfigMissing",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadAlgorithm(name) => write!(f, "unsupported algorithm: {}", name),
            Self::InputTooLarge { len, max } => {
                write!(f, "input of {} bytes exceeds maximum of {}", len, max)
            }
            Self::MalformedEnvelope => write!(f, "malformed ciphertext envelope"),
            Self::MalformedBackup => write!(f, "malformed backup artifact"),
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::NotAuthorized => write!(f, "not authorized"),
            Self::KeyUnknown(id) => write!(f, "key not found: {}", id),
            Self::KeyNotActive(id) => write!(f, "key not active: {}", id),
            Self::NothingToBackUp => write!(f, "no keys to back up"),
            Self::BadPadding => write!(f, "padding check failed"),
            Self::BadSignature => write!(f, "signature verification failed"),
            Self::RngFailure => write!(f, "random number generation failed"),
            Self::PersistenceFailure(msg) => write!(f, "persistence failure: {}", msg),
            Self::ConfigMissing(what) => write!(f, "missing configuration: {}", what),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<PrimitiveError> for CoreError {
    fn from(e: PrimitiveError) -> Self {
        match e {
            PrimitiveError::BadPadding => CoreError::BadPadding,
            PrimitiveError::BadSignature => CoreError::BadSignature,
            PrimitiveError::RngFailure => CoreError::RngFailure,
            // A key that does not parse is corrupt stored state, not a
            // caller mistake.
            PrimitiveError::BadKey => {
                CoreError::PersistenceFailure("invalid key material".into())
            }
        }
    }
}

impl From<EnvelopeError> for CoreError {
    fn from(_: EnvelopeError) -> Self {
        CoreError::MalformedEnvelope
    }
}
