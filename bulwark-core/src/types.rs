//! Core types: actors, algorithms, key records, operation and audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CoreError;

/// Stable actor identifier. Actor mutation is an external concern; the core
/// only reads identity, role, and status.
pub type ActorId = i64;

/// Internal key identifier: monotonic integer assigned on creation.
pub type KeyId = i64;

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Manager,
    Standard,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Administrator)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorStatus {
    Active,
    Inactive,
}

/// The caller identity presented to every core operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
    pub status: ActorStatus,
}

impl Actor {
    pub fn new(id: ActorId, role: Role) -> Self {
        Self {
            id,
            role,
            status: ActorStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ActorStatus::Active
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

// ---------------------------------------------------------------------------
// Algorithms
// ---------------------------------------------------------------------------

/// The closed set of supported key algorithms. Business code dispatches on
/// this enum; algorithm strings exist only at the registry boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Aes128Cbc,
    Aes256Cbc,
    Aes256Gcm,
    Rsa2048,
    EccP256,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Aes128Cbc => "AES-128-CBC",
            KeyAlgorithm::Aes256Cbc => "AES-256-CBC",
            KeyAlgorithm::Aes256Gcm => "AES-256-GCM",
            KeyAlgorithm::Rsa2048 => "RSA-2048",
            KeyAlgorithm::EccP256 => "ECC-P256",
        }
    }

    /// Parse the external algorithm name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AES-128-CBC" => Some(KeyAlgorithm::Aes128Cbc),
            "AES-256-CBC" => Some(KeyAlgorithm::Aes256Cbc),
            "AES-256-GCM" => Some(KeyAlgorithm::Aes256Gcm),
            "RSA-2048" => Some(KeyAlgorithm::Rsa2048),
            "ECC-P256" => Some(KeyAlgorithm::EccP256),
            _ => None,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            KeyAlgorithm::Aes128Cbc | KeyAlgorithm::Aes256Cbc | KeyAlgorithm::Aes256Gcm
        )
    }

    /// Symmetric key length in bytes, if symmetric.
    pub fn symmetric_key_len(&self) -> Option<usize> {
        match self {
            KeyAlgorithm::Aes128Cbc => Some(16),
            KeyAlgorithm::Aes256Cbc | KeyAlgorithm::Aes256Gcm => Some(32),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Key lifecycle state machine
// ---------------------------------------------------------------------------

/// Key lifecycle status.
///
/// ```text
/// ACTIVE ──→ REVOKED
///    │
///    └─────→ EXPIRED
/// ```
///
/// Transitions are monotonic: no key ever returns to ACTIVE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Revoked,
    Expired,
}

impl KeyStatus {
    /// Whether this status allows cryptographic use.
    pub fn is_active(&self) -> bool {
        matches!(self, KeyStatus::Active)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &[KeyStatus] {
        match self {
            KeyStatus::Active => &[KeyStatus::Revoked, KeyStatus::Expired],
            KeyStatus::Revoked => &[],
            KeyStatus::Expired => &[],
        }
    }

    pub fn can_transition_to(&self, target: KeyStatus) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStatus::Active => write!(f, "ACTIVE"),
            KeyStatus::Revoked => write!(f, "REVOKED"),
            KeyStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Algorithm-specific key payload. This is the structure that gets wrapped
/// under the master key; it exists unwrapped only transiently inside the
/// engine and is zeroed on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyMaterial {
    /// Symmetric key bytes, hex-encoded.
    Symmetric { key: String },
    /// PEM-encoded SPKI public key and PKCS#8 private key.
    #[serde(rename_all = "camelCase")]
    Keypair {
        public_key: String,
        private_key: String,
    },
}

impl KeyMaterial {
    pub fn symmetric(key: &[u8]) -> Self {
        KeyMaterial::Symmetric {
            key: hex::encode(key),
        }
    }

    pub fn keypair(public_pem: String, private_pem: String) -> Self {
        KeyMaterial::Keypair {
            public_key: public_pem,
            private_key: private_pem,
        }
    }

    /// Decode the symmetric key bytes. Fails when the payload is a keypair
    /// or the stored hex is corrupt.
    pub fn symmetric_key(&self) -> Result<zeroize::Zeroizing<Vec<u8>>, CoreError> {
        match self {
            KeyMaterial::Symmetric { key } => hex::decode(key)
                .map(zeroize::Zeroizing::new)
                .map_err(|_| CoreError::PersistenceFailure("corrupt key payload".into())),
            KeyMaterial::Keypair { .. } => {
                Err(CoreError::PersistenceFailure("payload is not symmetric".into()))
            }
        }
    }

    pub fn public_key_pem(&self) -> Option<&str> {
        match self {
            KeyMaterial::Keypair { public_key, .. } => Some(public_key),
            KeyMaterial::Symmetric { .. } => None,
        }
    }

    pub fn private_key_pem(&self) -> Option<&str> {
        match self {
            KeyMaterial::Keypair { private_key, .. } => Some(private_key),
            KeyMaterial::Symmetric { .. } => None,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Symmetric { .. } => write!(f, "KeyMaterial::Symmetric {{ .. }}"),
            KeyMaterial::Keypair { .. } => write!(f, "KeyMaterial::Keypair {{ .. }}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Key records
// ---------------------------------------------------------------------------

/// A managed key as persisted by the registry. Material is always wrapped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyRecord {
    pub internal_id: KeyId,
    /// Opaque external identifier, `K-<millis>-<8 hex>`. Stable across
    /// backup and restore.
    pub public_id: String,
    pub name: String,
    pub owner: ActorId,
    pub algorithm: KeyAlgorithm,
    /// Ciphertext of the serialized [`KeyMaterial`] under the master key.
    pub wrapped_material: Vec<u8>,
    /// 16-byte IV used for wrapping; distinct per key.
    pub wrap_iv: Vec<u8>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// The view that crosses the transport boundary: no wrapped material,
    /// no wrap IV.
    pub fn redacted(&self) -> RedactedKey {
        RedactedKey {
            internal_id: self.internal_id,
            public_id: self.public_id.clone(),
            name: self.name.clone(),
            owner: self.owner,
            algorithm: self.algorithm,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// [`KeyRecord`] without the secret-bearing fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedactedKey {
    pub internal_id: KeyId,
    pub public_id: String,
    pub name: String,
    pub owner: ActorId,
    pub algorithm: KeyAlgorithm,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Operation records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Encrypt,
    Decrypt,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Encrypt => write!(f, "encrypt"),
            OperationKind::Decrypt => write!(f, "decrypt"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// One successful cryptographic operation. Immutable once recorded; failures
/// never enter this stream (they live in the audit log).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: u64,
    pub actor: ActorId,
    pub key_internal_id: Option<KeyId>,
    pub kind: OperationKind,
    pub algorithm: KeyAlgorithm,
    /// Free-form caller-supplied label; never interpreted.
    pub resource_label: Option<String>,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    UserLogin,
    UserLogout,
    UserRegister,
    UserUpdate,
    DataEncrypt,
    DataDecrypt,
    KeyGenerate,
    KeyRevoke,
    KeyBackup,
    KeyRestore,
    AnomalyDetected,
    AlertsCleared,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserLogin => "USER_LOGIN",
            AuditAction::UserLogout => "USER_LOGOUT",
            AuditAction::UserRegister => "USER_REGISTER",
            AuditAction::UserUpdate => "USER_UPDATE",
            AuditAction::DataEncrypt => "DATA_ENCRYPT",
            AuditAction::DataDecrypt => "DATA_DECRYPT",
            AuditAction::KeyGenerate => "KEY_GENERATE",
            AuditAction::KeyRevoke => "KEY_REVOKE",
            AuditAction::KeyBackup => "KEY_BACKUP",
            AuditAction::KeyRestore => "KEY_RESTORE",
            AuditAction::AnomalyDetected => "ANOMALY_DETECTED",
            AuditAction::AlertsCleared => "ALERTS_CLEARED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Success,
    Failed,
    Warning,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failed => "FAILED",
            AuditStatus::Warning => "WARNING",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit log entry. Append-only; ids are strictly increasing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    /// None for pre-authentication events.
    pub actor: Option<ActorId>,
    pub action: AuditAction,
    pub resource: Option<String>,
    pub status: AuditStatus,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
    /// Structured key/value details. Sanitized: never key material,
    /// plaintext, or private PEMs.
    pub details: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hex of the previous record's JSON; the first record chains
    /// from a fixed genesis digest. Verifiers replay the log to detect
    /// insertion, deletion, or modification.
    pub prev_hash: String,
}
