//! Backup codec: the owner's key set as one master-key-wrapped artifact.
//!
//! Artifact format: `<16-byte-iv-hex> ":" <aes-256-cbc(JSON document)-hex>`.
//! The document preserves wrapped material as-is, so a restore on the same
//! master key yields usable keys without ever exposing plaintext material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bulwark_crypto::wire;

use crate::error::CoreError;
use crate::master::{MasterKey, WRAP_IV_BYTES};
use crate::types::{KeyAlgorithm, KeyRecord, KeyStatus};

pub const BACKUP_VERSION: &str = "1.0";

/// The serialized backup document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub keys: Vec<BackupKey>,
}

/// One key inside a backup. Material stays wrapped; binary fields travel
/// hex-encoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupKey {
    pub public_id: String,
    pub name: String,
    pub algorithm: KeyAlgorithm,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub wrapped_material: String,
    pub wrap_iv: String,
}

impl BackupKey {
    fn from_record(record: &KeyRecord) -> Self {
        Self {
            public_id: record.public_id.clone(),
            name: record.name.clone(),
            algorithm: record.algorithm,
            status: record.status,
            created_at: record.created_at,
            wrapped_material: hex::encode(&record.wrapped_material),
            wrap_iv: hex::encode(&record.wrap_iv),
        }
    }

    pub fn wrapped_material_bytes(&self) -> Result<Vec<u8>, CoreError> {
        hex::decode(&self.wrapped_material).map_err(|_| CoreError::MalformedBackup)
    }

    pub fn wrap_iv_bytes(&self) -> Result<Vec<u8>, CoreError> {
        hex::decode(&self.wrap_iv).map_err(|_| CoreError::MalformedBackup)
    }
}

/// Build the document for an owner's key set.
pub fn build_document(keys: &[KeyRecord]) -> BackupDocument {
    BackupDocument {
        version: BACKUP_VERSION.to_string(),
        timestamp: Utc::now(),
        keys: keys.iter().map(BackupKey::from_record).collect(),
    }
}

/// Serialize the document and wrap it under the master key with a fresh IV.
pub fn encode(master: &MasterKey, document: &BackupDocument) -> Result<String, CoreError> {
    let json = serde_json::to_vec(document)
        .map_err(|_| CoreError::PersistenceFailure("serialize backup".into()))?;
    let (iv, wrapped) = master.wrap(&json)?;
    Ok(wire::encode_aes(&iv, &wrapped))
}

/// Unwrap and parse an artifact. Everything that can go wrong with a
/// caller-supplied artifact is `MalformedBackup`.
pub fn decode(master: &MasterKey, artifact: &str) -> Result<BackupDocument, CoreError> {
    let (iv, wrapped) =
        wire::parse_aes(artifact, WRAP_IV_BYTES).map_err(|_| CoreError::MalformedBackup)?;
    let json = master
        .unwrap(&iv, &wrapped)
        .map_err(|_| CoreError::MalformedBackup)?;
    serde_json::from_slice(&json).map_err(|_| CoreError::MalformedBackup)
}
