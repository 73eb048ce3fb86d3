//! The crypto engine: the operation surface the transport layer calls.
//!
//! Every operation follows the same shape: authorize through the policy
//! guard, resolve the key through the registry, unwrap material through the
//! master key, run the primitive, then record. Successes write one
//! OperationRecord and one SUCCESS audit record; failures write no
//! OperationRecord and exactly one FAILED audit record, observable before
//! the error reaches the caller. Encrypt/decrypt additionally kick off
//! anomaly analysis on a background task that never blocks the result.

use std::sync::Arc;

use bulwark_crypto::{cipher, ecc, kdf, rng, rsa, wire};

use crate::anomaly::{Anomaly, AnomalyConfig, AnomalyDetector};
use crate::audit::{AuditEntry, AuditFilter, AuditLog, AuditSink, OperationsLog};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::guard;
use crate::master::MasterKey;
use crate::registry::KeyRegistry;
use crate::storage::KeyStore;
use crate::types::{
    Actor, ActorId, AuditAction, AuditRecord, AuditStatus, KeyAlgorithm, KeyId, KeyRecord,
    OperationKind, OperationRecord, RedactedKey,
};
use crate::{backup, types::KeyMaterial};

pub struct Engine {
    registry: Arc<KeyRegistry>,
    audit: Arc<AuditLog>,
    operations: Arc<OperationsLog>,
    detector: Arc<AnomalyDetector>,
    master: Arc<MasterKey>,
}

impl Engine {
    pub fn new(store: Arc<dyn KeyStore>, master: MasterKey, anomaly: AnomalyConfig) -> Self {
        Self::build(store, master, anomaly, None)
    }

    /// As [`new`](Self::new), mirroring every audit record to `mirror`.
    pub fn with_audit_mirror(
        store: Arc<dyn KeyStore>,
        master: MasterKey,
        anomaly: AnomalyConfig,
        mirror: Arc<dyn AuditSink>,
    ) -> Self {
        Self::build(store, master, anomaly, Some(mirror))
    }

    /// Resolve the master key from configuration and wire the engine up.
    pub fn from_config(config: &CoreConfig, store: Arc<dyn KeyStore>) -> Result<Self, CoreError> {
        let master = MasterKey::from_config(config)?;
        Ok(Self::build(store, master, config.anomaly.clone(), None))
    }

    fn build(
        store: Arc<dyn KeyStore>,
        master: MasterKey,
        anomaly: AnomalyConfig,
        mirror: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        let master = Arc::new(master);
        let audit = Arc::new(match mirror {
            Some(mirror) => AuditLog::with_mirror(mirror),
            None => AuditLog::new(),
        });
        Self {
            registry: Arc::new(KeyRegistry::new(store, Arc::clone(&master))),
            detector: Arc::new(AnomalyDetector::new(anomaly, Arc::clone(&audit))),
            operations: Arc::new(OperationsLog::new()),
            audit,
            master,
        }
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn operations(&self) -> &OperationsLog {
        &self.operations
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    // -----------------------------------------------------------------------
    // Key management
    // -----------------------------------------------------------------------

    /// Create a key for the calling actor. `algorithm` is the external
    /// algorithm name, e.g. `"AES-256-CBC"`.
    pub async fn create_key(
        &self,
        actor: &Actor,
        name: &str,
        algorithm: &str,
    ) -> Result<RedactedKey, CoreError> {
        let result = self.create_key_inner(actor, name, algorithm);
        match result {
            Ok(record) => {
                self.audit.record(
                    AuditEntry::new(AuditAction::KeyGenerate, AuditStatus::Success)
                        .with_actor(actor.id)
                        .with_resource(record.public_id.clone())
                        .with_detail("algorithm", record.algorithm.as_str())
                        .with_detail("name", record.name.clone()),
                )?;
                Ok(record.redacted())
            }
            Err(err) => {
                self.audit_failure(Some(actor.id), AuditAction::KeyGenerate, None, &err);
                Err(err)
            }
        }
    }

    fn create_key_inner(
        &self,
        actor: &Actor,
        name: &str,
        algorithm: &str,
    ) -> Result<KeyRecord, CoreError> {
        guard::ensure_actor_active(actor)?;
        let algorithm = KeyAlgorithm::parse(algorithm)
            .ok_or_else(|| CoreError::BadAlgorithm(algorithm.to_string()))?;
        self.registry.create_key(actor.id, name, algorithm)
    }

    /// Revoke a key. Owner or administrator only; revoking an already
    /// revoked key succeeds as a no-op.
    pub async fn revoke_key(&self, actor: &Actor, key_id: KeyId) -> Result<(), CoreError> {
        let result = self.revoke_key_inner(actor, key_id);
        match result {
            Ok(public_id) => {
                self.audit.record(
                    AuditEntry::new(AuditAction::KeyRevoke, AuditStatus::Success)
                        .with_actor(actor.id)
                        .with_resource(public_id),
                )?;
                Ok(())
            }
            Err(err) => {
                self.audit_failure(Some(actor.id), AuditAction::KeyRevoke, None, &err);
                Err(err)
            }
        }
    }

    fn revoke_key_inner(&self, actor: &Actor, key_id: KeyId) -> Result<String, CoreError> {
        guard::ensure_actor_active(actor)?;
        let record = self
            .registry
            .get_key(key_id)?
            .ok_or(CoreError::KeyUnknown(key_id))?;
        guard::ensure_can_mutate(actor, &record)?;
        self.registry.revoke(key_id)?;
        Ok(record.public_id)
    }

    /// List keys visible to the actor, redacted. Administrators see all.
    pub async fn list_keys(&self, actor: &Actor) -> Result<Vec<RedactedKey>, CoreError> {
        guard::ensure_actor_active(actor)?;
        let keys = if actor.is_admin() {
            self.registry.list_all()?
        } else {
            self.registry.list_keys_for(actor.id)?
        };
        Ok(keys.iter().map(KeyRecord::redacted).collect())
    }

    // -----------------------------------------------------------------------
    // Encrypt / decrypt
    // -----------------------------------------------------------------------

    /// Encrypt `data` under the key, returning the self-describing envelope.
    pub async fn encrypt(
        &self,
        actor: &Actor,
        key_id: KeyId,
        data: &[u8],
        resource_label: &str,
    ) -> Result<String, CoreError> {
        match self.encrypt_inner(actor, key_id, data) {
            Ok((envelope, record)) => {
                let op = self.operations.record(
                    actor.id,
                    Some(key_id),
                    OperationKind::Encrypt,
                    record.algorithm,
                    Some(resource_label.to_string()),
                )?;
                self.detector.observe(&op);
                self.audit.record(
                    AuditEntry::new(AuditAction::DataEncrypt, AuditStatus::Success)
                        .with_actor(actor.id)
                        .with_resource(resource_label)
                        .with_detail("key", record.public_id.clone())
                        .with_detail("algorithm", record.algorithm.as_str()),
                )?;
                self.spawn_analysis(actor.id);
                Ok(envelope)
            }
            Err(err) => {
                self.audit_failure(
                    Some(actor.id),
                    AuditAction::DataEncrypt,
                    Some(resource_label),
                    &err,
                );
                self.spawn_analysis(actor.id);
                Err(err)
            }
        }
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt).
    pub async fn decrypt(
        &self,
        actor: &Actor,
        key_id: KeyId,
        envelope: &str,
        resource_label: &str,
    ) -> Result<Vec<u8>, CoreError> {
        match self.decrypt_inner(actor, key_id, envelope) {
            Ok((plaintext, record)) => {
                let op = self.operations.record(
                    actor.id,
                    Some(key_id),
                    OperationKind::Decrypt,
                    record.algorithm,
                    Some(resource_label.to_string()),
                )?;
                self.detector.observe(&op);
                self.audit.record(
                    AuditEntry::new(AuditAction::DataDecrypt, AuditStatus::Success)
                        .with_actor(actor.id)
                        .with_resource(resource_label)
                        .with_detail("key", record.public_id.clone())
                        .with_detail("algorithm", record.algorithm.as_str()),
                )?;
                self.spawn_analysis(actor.id);
                Ok(plaintext)
            }
            Err(err) => {
                self.audit_failure(
                    Some(actor.id),
                    AuditAction::DataDecrypt,
                    Some(resource_label),
                    &err,
                );
                self.spawn_analysis(actor.id);
                Err(err)
            }
        }
    }

    fn encrypt_inner(
        &self,
        actor: &Actor,
        key_id: KeyId,
        data: &[u8],
    ) -> Result<(String, KeyRecord), CoreError> {
        guard::ensure_actor_active(actor)?;
        let record = self
            .registry
            .get_key(key_id)?
            .ok_or(CoreError::KeyUnknown(key_id))?;
        guard::ensure_can_use(actor, &record)?;
        let material = self.registry.unwrap_material(key_id)?;

        let envelope = match record.algorithm {
            KeyAlgorithm::Aes128Cbc | KeyAlgorithm::Aes256Cbc => {
                let key = material.symmetric_key()?;
                let iv = rng::random_bytes(cipher::IV_BYTES)?;
                let ciphertext = cipher::aes_cbc_encrypt(&key, &iv, data)?;
                wire::encode_aes(&iv, &ciphertext)
            }
            KeyAlgorithm::Aes256Gcm => {
                let key = material.symmetric_key()?;
                let nonce = rng::random_bytes(cipher::GCM_NONCE_BYTES)?;
                let ciphertext = cipher::aes_gcm_encrypt(&key, &nonce, data)?;
                wire::encode_aes(&nonce, &ciphertext)
            }
            KeyAlgorithm::Rsa2048 => {
                let public_pem = public_pem(&material)?;
                let max = rsa::max_plaintext_len(public_pem)?;
                if data.len() > max {
                    return Err(CoreError::InputTooLarge {
                        len: data.len(),
                        max,
                    });
                }
                wire::encode_rsa(&rsa::encrypt(public_pem, data)?)
            }
            KeyAlgorithm::EccP256 => {
                // Hybrid: ephemeral ECDH, AES key = SHA-256(shared secret),
                // ephemeral public rides in the envelope.
                let agreement = ecc::ephemeral_agree(public_pem(&material)?)?;
                let aes_key = kdf::derive_key(&agreement.shared_secret);
                let iv = rng::random_bytes(cipher::IV_BYTES)?;
                let ciphertext = cipher::aes_cbc_encrypt(&aes_key, &iv, data)?;
                wire::encode_ecc(&agreement.public_point, &iv, &ciphertext)
            }
        };
        Ok((envelope, record))
    }

    fn decrypt_inner(
        &self,
        actor: &Actor,
        key_id: KeyId,
        envelope: &str,
    ) -> Result<(Vec<u8>, KeyRecord), CoreError> {
        guard::ensure_actor_active(actor)?;
        let record = self
            .registry
            .get_key(key_id)?
            .ok_or(CoreError::KeyUnknown(key_id))?;
        guard::ensure_can_use(actor, &record)?;
        let material = self.registry.unwrap_material(key_id)?;

        let plaintext = match record.algorithm {
            KeyAlgorithm::Aes128Cbc | KeyAlgorithm::Aes256Cbc => {
                let (iv, ciphertext) = wire::parse_aes(envelope, cipher::IV_BYTES)?;
                cipher::aes_cbc_decrypt(&material.symmetric_key()?, &iv, &ciphertext)?
            }
            KeyAlgorithm::Aes256Gcm => {
                let (nonce, ciphertext) = wire::parse_aes(envelope, cipher::GCM_NONCE_BYTES)?;
                cipher::aes_gcm_decrypt(&material.symmetric_key()?, &nonce, &ciphertext)?
            }
            KeyAlgorithm::Rsa2048 => {
                let ciphertext = wire::parse_rsa(envelope)?;
                rsa::decrypt(private_pem(&material)?, &ciphertext)?
            }
            KeyAlgorithm::EccP256 => {
                let (point, iv, ciphertext) = wire::parse_ecc(envelope)?;
                let shared = ecc::ecdh_agree(private_pem(&material)?, &point)?;
                let aes_key = kdf::derive_key(&shared);
                cipher::aes_cbc_decrypt(&aes_key, &iv, &ciphertext)?
            }
        };
        Ok((plaintext, record))
    }

    // -----------------------------------------------------------------------
    // Backup
    // -----------------------------------------------------------------------

    /// Export the actor's key set as one wrapped artifact.
    pub async fn export_backup(&self, actor: &Actor) -> Result<String, CoreError> {
        let result = self.export_backup_inner(actor);
        match result {
            Ok((artifact, count)) => {
                self.audit.record(
                    AuditEntry::new(AuditAction::KeyBackup, AuditStatus::Success)
                        .with_actor(actor.id)
                        .with_detail("key_count", count),
                )?;
                Ok(artifact)
            }
            Err(err) => {
                self.audit_failure(Some(actor.id), AuditAction::KeyBackup, None, &err);
                Err(err)
            }
        }
    }

    fn export_backup_inner(&self, actor: &Actor) -> Result<(String, usize), CoreError> {
        guard::ensure_actor_active(actor)?;
        let keys = self.registry.list_keys_for(actor.id)?;
        if keys.is_empty() {
            return Err(CoreError::NothingToBackUp);
        }
        let document = backup::build_document(&keys);
        let artifact = backup::encode(&self.master, &document)?;
        Ok((artifact, keys.len()))
    }

    /// Restore keys from an artifact. Keys whose `public_id` already exists
    /// are skipped; restored keys belong to the importer. Returns the number
    /// restored.
    pub async fn import_backup(&self, actor: &Actor, artifact: &str) -> Result<usize, CoreError> {
        let result = self.import_backup_inner(actor, artifact);
        match result {
            Ok(restored) => {
                self.audit.record(
                    AuditEntry::new(AuditAction::KeyRestore, AuditStatus::Success)
                        .with_actor(actor.id)
                        .with_detail("restored_count", restored),
                )?;
                Ok(restored)
            }
            Err(err) => {
                self.audit_failure(Some(actor.id), AuditAction::KeyRestore, None, &err);
                Err(err)
            }
        }
    }

    fn import_backup_inner(&self, actor: &Actor, artifact: &str) -> Result<usize, CoreError> {
        guard::ensure_actor_active(actor)?;
        let document = backup::decode(&self.master, artifact)?;
        let mut restored = 0;
        for key in &document.keys {
            let inserted = self.registry.restore_key(
                actor.id,
                &key.public_id,
                &key.name,
                key.algorithm,
                key.status,
                key.created_at,
                key.wrapped_material_bytes()?,
                key.wrap_iv_bytes()?,
            )?;
            if inserted {
                restored += 1;
            }
        }
        Ok(restored)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Recent successful operations, newest first. Administrators see all
    /// actors; everyone else sees their own.
    pub async fn list_operations(
        &self,
        actor: &Actor,
        limit: usize,
    ) -> Result<Vec<OperationRecord>, CoreError> {
        guard::ensure_actor_active(actor)?;
        let scope = if actor.is_admin() { None } else { Some(actor.id) };
        self.operations.list(scope, limit)
    }

    /// Query the audit log. Administrators query unrestricted; other actors
    /// are scoped to their own records. Returns `(records, total)`.
    pub async fn query_audit(
        &self,
        actor: &Actor,
        mut filter: AuditFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<AuditRecord>, u64), CoreError> {
        guard::ensure_actor_active(actor)?;
        if !actor.is_admin() {
            filter.actor = Some(actor.id);
        }
        let records = self.audit.query(&filter, limit, offset)?;
        let total = self.audit.count(&filter)?;
        Ok((records, total))
    }

    /// Anomaly alerts, newest first. Administrators may filter by actor;
    /// everyone else sees their own.
    pub async fn security_alerts(
        &self,
        actor: &Actor,
        filter_actor: Option<ActorId>,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, CoreError> {
        guard::ensure_actor_active(actor)?;
        let scope = if actor.is_admin() {
            filter_actor
        } else {
            Some(actor.id)
        };
        let filter = AuditFilter {
            actor: scope,
            action: Some(AuditAction::AnomalyDetected),
            status: None,
        };
        self.audit.query(&filter, limit, 0)
    }

    /// Clear the actor's anomaly state. The audit log itself is append-only;
    /// this drops the detector cache and records the operator action.
    pub async fn clear_alerts(&self, actor: &Actor) -> Result<(), CoreError> {
        guard::ensure_actor_active(actor)?;
        self.detector.reset(actor.id);
        self.audit.record(
            AuditEntry::new(AuditAction::AlertsCleared, AuditStatus::Success)
                .with_actor(actor.id),
        )?;
        Ok(())
    }

    /// Run anomaly analysis for an actor synchronously. The engine schedules
    /// this in the background after every encrypt/decrypt; sweeps and tests
    /// can invoke it directly.
    pub fn analyze(&self, actor: ActorId) -> Result<Option<Anomaly>, CoreError> {
        self.detector.analyze_and_record(actor)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Fire-and-forget anomaly analysis. Failures are logged, never surfaced.
    fn spawn_analysis(&self, actor: ActorId) {
        let detector = Arc::clone(&self.detector);
        tokio::spawn(async move {
            if let Err(err) = detector.analyze_and_record(actor) {
                tracing::warn!(actor, "anomaly analysis failed: {}", err);
            }
        });
    }

    /// One FAILED audit record per failure path, written before the error
    /// propagates. The detail carries only the error kind.
    fn audit_failure(
        &self,
        actor: Option<ActorId>,
        action: AuditAction,
        resource: Option<&str>,
        err: &CoreError,
    ) {
        let mut entry =
            AuditEntry::new(action, AuditStatus::Failed).with_detail("error", err.kind());
        if let Some(actor) = actor {
            entry = entry.with_actor(actor);
        }
        if let Some(resource) = resource {
            entry = entry.with_resource(resource);
        }
        if let Err(err) = self.audit.record(entry) {
            tracing::error!("failed to write audit record: {}", err);
        }
    }
}

fn public_pem(material: &KeyMaterial) -> Result<&str, CoreError> {
    material
        .public_key_pem()
        .ok_or_else(|| CoreError::PersistenceFailure("payload is not a keypair".into()))
}

fn private_pem(material: &KeyMaterial) -> Result<&str, CoreError> {
    material
        .private_key_pem()
        .ok_or_else(|| CoreError::PersistenceFailure("payload is not a keypair".into()))
}
