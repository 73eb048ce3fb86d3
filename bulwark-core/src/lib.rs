//! # Bulwark Core
//!
//! Cryptographic core of the Bulwark data-privacy service.
//!
//! Generates and lifecycle-manages multi-algorithm keys, encrypts and
//! decrypts byte payloads under them, protects stored material with envelope
//! encryption under a master key, writes tamper-evident operation and audit
//! records, and runs an online anomaly detector over those records.
//!
//! Transport, sessions, and user management live elsewhere; they call into
//! [`Engine`] with an [`Actor`] and get typed results back.
//!
//! ## Quick Start
//!
//! ```ignore
//! use bulwark_core::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(InMemoryKeyStore::new());
//! let master = MasterKey::generate().unwrap();
//! let engine = Engine::new(store, master, AnomalyConfig::default());
//!
//! let alice = Actor::new(1, Role::Standard);
//! let key = engine.create_key(&alice, "documents", "AES-256-CBC").await.unwrap();
//!
//! let envelope = engine.encrypt(&alice, key.internal_id, b"secret", "doc-1").await.unwrap();
//! let plaintext = engine.decrypt(&alice, key.internal_id, &envelope, "doc-1").await.unwrap();
//! assert_eq!(plaintext, b"secret");
//! # });
//! ```

pub mod anomaly;
pub mod audit;
pub mod backup;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod master;
pub mod registry;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use anomaly::{Anomaly, AnomalyConfig, AnomalyDetector, AnomalyKind, AnomalySeverity};
pub use audit::{
    AuditEntry, AuditFilter, AuditLog, AuditSink, FileAuditSink, OperationsLog, TracingAuditSink,
};
pub use backup::{BackupDocument, BackupKey};
pub use config::CoreConfig;
pub use engine::Engine;
pub use error::CoreError;
pub use master::MasterKey;
pub use registry::KeyRegistry;
pub use storage::{FileKeyStore, InMemoryKeyStore, KeyStore};
pub use types::{
    Actor, ActorId, ActorStatus, AuditAction, AuditRecord, AuditStatus, KeyAlgorithm, KeyId,
    KeyMaterial, KeyRecord, KeyStatus, OperationKind, OperationRecord, Outcome, RedactedKey, Role,
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;

    fn test_anomaly_config() -> AnomalyConfig {
        // Disable the working-hours detector so suites pass at any hour.
        AnomalyConfig {
            working_hours: (0, 24),
            ..AnomalyConfig::default()
        }
    }

    fn test_engine() -> Engine {
        Engine::new(
            Arc::new(InMemoryKeyStore::new()),
            MasterKey::generate().unwrap(),
            test_anomaly_config(),
        )
    }

    fn admin() -> Actor {
        Actor::new(1, Role::Administrator)
    }

    fn standard(id: ActorId) -> Actor {
        Actor::new(id, Role::Standard)
    }

    fn hex_segments(envelope: &str) -> Vec<&str> {
        envelope.split(':').collect()
    }

    // === Key creation ===

    #[tokio::test]
    async fn test_create_key() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        assert_eq!(key.name, "doc");
        assert_eq!(key.owner, alice.id);
        assert_eq!(key.algorithm, KeyAlgorithm::Aes256Cbc);
        assert_eq!(key.status, KeyStatus::Active);
        assert!(key.public_id.starts_with("K-"));
        assert!(key.last_used_at.is_none());
    }

    #[tokio::test]
    async fn test_create_key_all_algorithms() {
        let engine = test_engine();
        let alice = standard(10);
        for name in [
            "AES-128-CBC",
            "AES-256-CBC",
            "AES-256-GCM",
            "RSA-2048",
            "ECC-P256",
        ] {
            let key = engine.create_key(&alice, name, name).await.unwrap();
            assert_eq!(key.algorithm.as_str(), name);
        }
        assert_eq!(engine.list_keys(&alice).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_create_key_bad_algorithm() {
        let engine = test_engine();
        let alice = standard(10);
        let err = engine
            .create_key(&alice, "legacy", "DES-56")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BadAlgorithm(_)));

        let failed = engine
            .audit()
            .query(
                &AuditFilter {
                    action: Some(AuditAction::KeyGenerate),
                    status: Some(AuditStatus::Failed),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].details.get("error").and_then(|v| v.as_str()),
            Some("BadAlgorithm")
        );
    }

    #[tokio::test]
    async fn test_public_ids_unique() {
        let engine = test_engine();
        let alice = standard(10);
        let mut seen = std::collections::HashSet::new();
        for i in 0..10 {
            let key = engine
                .create_key(&alice, &format!("key-{}", i), "AES-128-CBC")
                .await
                .unwrap();
            assert!(seen.insert(key.public_id));
        }
    }

    // === Encrypt / decrypt ===

    #[tokio::test]
    async fn test_aes_round_trip() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        let envelope = engine
            .encrypt(&alice, key.internal_id, b"hello", "greeting")
            .await
            .unwrap();

        let segments = hex_segments(&envelope);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 32); // 16-byte IV
        assert!(segments[1].len() >= 32); // at least one AES block

        let plaintext = engine
            .decrypt(&alice, key.internal_id, &envelope, "greeting")
            .await
            .unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[tokio::test]
    async fn test_aes_ciphertexts_differ() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-128-CBC")
            .await
            .unwrap();

        let a = engine
            .encrypt(&alice, key.internal_id, b"same plaintext", "r")
            .await
            .unwrap();
        let b = engine
            .encrypt(&alice, key.internal_id, b"same plaintext", "r")
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_gcm_round_trip() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-GCM")
            .await
            .unwrap();

        let envelope = engine
            .encrypt(&alice, key.internal_id, b"sealed", "r")
            .await
            .unwrap();
        let segments = hex_segments(&envelope);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 24); // 12-byte nonce

        let plaintext = engine
            .decrypt(&alice, key.internal_id, &envelope, "r")
            .await
            .unwrap();
        assert_eq!(plaintext, b"sealed");
    }

    #[tokio::test]
    async fn test_gcm_tamper_fails() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-GCM")
            .await
            .unwrap();

        let envelope = engine
            .encrypt(&alice, key.internal_id, b"sealed", "r")
            .await
            .unwrap();
        let mut tampered = envelope.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();

        let err = engine
            .decrypt(&alice, key.internal_id, &tampered, "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::BadSignature);
    }

    #[tokio::test]
    async fn test_rsa_round_trip() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "RSA-2048")
            .await
            .unwrap();

        let envelope = engine
            .encrypt(&alice, key.internal_id, b"rsa payload", "r")
            .await
            .unwrap();
        assert_eq!(hex_segments(&envelope).len(), 1);
        assert_eq!(envelope.len(), 512); // 256-byte ciphertext, hex

        let plaintext = engine
            .decrypt(&alice, key.internal_id, &envelope, "r")
            .await
            .unwrap();
        assert_eq!(plaintext, b"rsa payload");
    }

    #[tokio::test]
    async fn test_rsa_over_large_input() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "RSA-2048")
            .await
            .unwrap();

        let big = vec![0x55u8; 300];
        let err = engine
            .encrypt(&alice, key.internal_id, &big, "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InputTooLarge { len: 300, max: 245 });
    }

    #[tokio::test]
    async fn test_ecc_interop() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "ECC-P256")
            .await
            .unwrap();

        let a = engine
            .encrypt(&alice, key.internal_id, b"privacy", "r")
            .await
            .unwrap();
        let b = engine
            .encrypt(&alice, key.internal_id, b"privacy", "r")
            .await
            .unwrap();

        let seg_a = hex_segments(&a);
        let seg_b = hex_segments(&b);
        assert_eq!(seg_a.len(), 3);
        assert_eq!(seg_b.len(), 3);
        // Distinct ephemeral publics per encryption
        assert_ne!(seg_a[0], seg_b[0]);

        assert_eq!(
            engine
                .decrypt(&alice, key.internal_id, &a, "r")
                .await
                .unwrap(),
            b"privacy"
        );
        assert_eq!(
            engine
                .decrypt(&alice, key.internal_id, &b, "r")
                .await
                .unwrap(),
            b"privacy"
        );
    }

    #[tokio::test]
    async fn test_envelope_segment_discipline() {
        let engine = test_engine();
        let alice = standard(10);
        let aes = engine
            .create_key(&alice, "aes", "AES-256-CBC")
            .await
            .unwrap();
        let rsa = engine
            .create_key(&alice, "rsa", "RSA-2048")
            .await
            .unwrap();
        let ecc = engine
            .create_key(&alice, "ecc", "ECC-P256")
            .await
            .unwrap();

        // Wrong segment counts are rejected, never guessed at.
        for bogus in ["deadbeef", "aa:bb:cc", ":", ""] {
            let err = engine
                .decrypt(&alice, aes.internal_id, bogus, "r")
                .await
                .unwrap_err();
            assert_eq!(err, CoreError::MalformedEnvelope, "aes accepted {:?}", bogus);
        }
        let err = engine
            .decrypt(&alice, rsa.internal_id, "aa:bb", "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::MalformedEnvelope);
        let err = engine
            .decrypt(&alice, ecc.internal_id, "aa:bb", "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::MalformedEnvelope);
    }

    #[tokio::test]
    async fn test_decrypt_unknown_key() {
        let engine = test_engine();
        let alice = standard(10);
        let err = engine
            .decrypt(&alice, 999, "aa:bb", "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::KeyUnknown(999));
    }

    #[tokio::test]
    async fn test_truncated_aes_ciphertext_fails_padding() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();
        let envelope = engine
            .encrypt(&alice, key.internal_id, b"0123456789abcdef0123", "r")
            .await
            .unwrap();

        // Drop one block from the ciphertext: still well-formed hex, bad padding.
        let truncated = envelope[..envelope.len() - 32].to_string();
        let err = engine
            .decrypt(&alice, key.internal_id, &truncated, "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::BadPadding);
    }

    // === Lifecycle ===

    #[tokio::test]
    async fn test_revoke_then_use() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();
        let envelope = engine
            .encrypt(&alice, key.internal_id, b"x", "r")
            .await
            .unwrap();

        engine.revoke_key(&alice, key.internal_id).await.unwrap();

        let err = engine
            .decrypt(&alice, key.internal_id, &envelope, "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::KeyNotActive(key.internal_id));

        let failed = engine
            .audit()
            .query(
                &AuditFilter {
                    action: Some(AuditAction::DataDecrypt),
                    status: Some(AuditStatus::Failed),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].details.get("error").and_then(|v| v.as_str()),
            Some("KeyNotActive")
        );
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-128-CBC")
            .await
            .unwrap();
        engine.revoke_key(&alice, key.internal_id).await.unwrap();
        engine.revoke_key(&alice, key.internal_id).await.unwrap();

        let keys = engine.list_keys(&alice).await.unwrap();
        assert_eq!(keys[0].status, KeyStatus::Revoked);
    }

    #[tokio::test]
    async fn test_status_machine_is_monotonic() {
        assert!(KeyStatus::Active.can_transition_to(KeyStatus::Revoked));
        assert!(KeyStatus::Active.can_transition_to(KeyStatus::Expired));
        assert!(!KeyStatus::Revoked.can_transition_to(KeyStatus::Active));
        assert!(!KeyStatus::Expired.can_transition_to(KeyStatus::Active));
        assert!(!KeyStatus::Revoked.can_transition_to(KeyStatus::Expired));
    }

    #[tokio::test]
    async fn test_last_used_advances() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        engine
            .encrypt(&alice, key.internal_id, b"a", "r")
            .await
            .unwrap();
        let first = engine.list_keys(&alice).await.unwrap()[0]
            .last_used_at
            .unwrap();

        engine
            .encrypt(&alice, key.internal_id, b"b", "r")
            .await
            .unwrap();
        let second = engine.list_keys(&alice).await.unwrap()[0]
            .last_used_at
            .unwrap();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn test_expiry_sweep() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        engine
            .registry()
            .set_expiration(key.internal_id, Some(Utc::now() - ChronoDuration::hours(1)))
            .unwrap();
        assert_eq!(engine.registry().expire_due().unwrap(), 1);

        let err = engine
            .encrypt(&alice, key.internal_id, b"x", "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::KeyNotActive(key.internal_id));
    }

    // === Authorization ===

    #[tokio::test]
    async fn test_non_owner_cannot_use_or_see() {
        let engine = test_engine();
        let alice = standard(10);
        let mallory = standard(11);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        let err = engine
            .encrypt(&mallory, key.internal_id, b"x", "r")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotAuthorized);

        assert!(engine.list_keys(&mallory).await.unwrap().is_empty());

        let err = engine
            .revoke_key(&mallory, key.internal_id)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotAuthorized);

        // The denial is audited
        let failed = engine
            .audit()
            .query(
                &AuditFilter {
                    actor: Some(mallory.id),
                    status: Some(AuditStatus::Failed),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn test_admin_has_universal_access() {
        let engine = test_engine();
        let alice = standard(10);
        let root = admin();
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        assert_eq!(engine.list_keys(&root).await.unwrap().len(), 1);
        let envelope = engine
            .encrypt(&root, key.internal_id, b"x", "r")
            .await
            .unwrap();
        engine
            .decrypt(&root, key.internal_id, &envelope, "r")
            .await
            .unwrap();
        engine.revoke_key(&root, key.internal_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_inactive_actor_is_rejected() {
        let engine = test_engine();
        let mut ghost = standard(10);
        ghost.status = ActorStatus::Inactive;

        let err = engine
            .create_key(&ghost, "doc", "AES-256-CBC")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotAuthenticated);
    }

    // === Audit ===

    #[tokio::test]
    async fn test_audit_totality_and_ordering() {
        let engine = test_engine();
        let alice = standard(10);

        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();
        let envelope = engine
            .encrypt(&alice, key.internal_id, b"x", "r")
            .await
            .unwrap();
        engine
            .decrypt(&alice, key.internal_id, &envelope, "r")
            .await
            .unwrap();
        engine.revoke_key(&alice, key.internal_id).await.unwrap();
        let _ = engine
            .decrypt(&alice, key.internal_id, &envelope, "r")
            .await
            .unwrap_err();

        // One record per operation: generate, encrypt, decrypt, revoke,
        // failed decrypt.
        assert_eq!(engine.audit().len(), 5);

        let (records, total) = engine
            .query_audit(&admin(), AuditFilter::default(), 100, 0)
            .await
            .unwrap();
        assert_eq!(total, 5);
        // Newest first, ids strictly decreasing
        for pair in records.windows(2) {
            assert!(pair[0].id > pair[1].id);
        }
    }

    #[tokio::test]
    async fn test_audit_chain_verifies() {
        let engine = test_engine();
        let alice = standard(10);
        for i in 0..4 {
            engine
                .create_key(&alice, &format!("k{}", i), "AES-128-CBC")
                .await
                .unwrap();
        }
        assert!(engine.audit().verify_chain());
    }

    #[tokio::test]
    async fn test_audit_query_filters_and_count() {
        let engine = test_engine();
        let alice = standard(10);
        let bob = standard(11);

        engine
            .create_key(&alice, "a", "AES-128-CBC")
            .await
            .unwrap();
        engine.create_key(&bob, "b", "AES-128-CBC").await.unwrap();
        let _ = engine
            .create_key(&alice, "c", "NOPE")
            .await
            .unwrap_err();

        let filter = AuditFilter {
            actor: Some(alice.id),
            action: Some(AuditAction::KeyGenerate),
            status: None,
        };
        assert_eq!(engine.audit().count(&filter).unwrap(), 2);

        let success_only = AuditFilter {
            status: Some(AuditStatus::Success),
            ..filter
        };
        assert_eq!(engine.audit().count(&success_only).unwrap(), 1);

        // Offset pagination
        let all = engine.audit().query(&AuditFilter::default(), 2, 0).unwrap();
        let next = engine.audit().query(&AuditFilter::default(), 2, 2).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(next.len(), 1);
        assert!(all[1].id > next[0].id);
    }

    #[tokio::test]
    async fn test_query_audit_scopes_non_admins_to_self() {
        let engine = test_engine();
        let alice = standard(10);
        let bob = standard(11);
        engine
            .create_key(&alice, "a", "AES-128-CBC")
            .await
            .unwrap();
        engine.create_key(&bob, "b", "AES-128-CBC").await.unwrap();

        let (records, total) = engine
            .query_audit(&alice, AuditFilter::default(), 100, 0)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(records[0].actor, Some(alice.id));
    }

    #[tokio::test]
    async fn test_failure_details_are_sanitized() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "ECC-P256")
            .await
            .unwrap();
        let _ = engine
            .decrypt(&alice, key.internal_id, "not-an-envelope", "r")
            .await
            .unwrap_err();

        let failed = engine
            .audit()
            .query(
                &AuditFilter {
                    status: Some(AuditStatus::Failed),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("MalformedEnvelope"));
        assert!(!json.contains("PRIVATE KEY"));
    }

    // === Operations stream ===

    #[tokio::test]
    async fn test_operations_record_successes_only() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        engine
            .encrypt(&alice, key.internal_id, b"x", "label-1")
            .await
            .unwrap();
        let _ = engine
            .decrypt(&alice, key.internal_id, "bogus", "label-2")
            .await
            .unwrap_err();

        let ops = engine.list_operations(&alice, 10).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Encrypt);
        assert_eq!(ops[0].outcome, Outcome::Success);
        assert_eq!(ops[0].resource_label.as_deref(), Some("label-1"));
    }

    #[tokio::test]
    async fn test_list_operations_scoping() {
        let engine = test_engine();
        let alice = standard(10);
        let bob = standard(11);
        let ka = engine
            .create_key(&alice, "a", "AES-128-CBC")
            .await
            .unwrap();
        let kb = engine.create_key(&bob, "b", "AES-128-CBC").await.unwrap();
        engine
            .encrypt(&alice, ka.internal_id, b"x", "r")
            .await
            .unwrap();
        engine
            .encrypt(&bob, kb.internal_id, b"x", "r")
            .await
            .unwrap();

        assert_eq!(engine.list_operations(&alice, 10).await.unwrap().len(), 1);
        assert_eq!(engine.list_operations(&admin(), 10).await.unwrap().len(), 2);
    }

    // === Backup ===

    #[tokio::test]
    async fn test_backup_cycle_restores_into_fresh_store() {
        // Same master key on both sides, as in disaster recovery.
        let master_bytes: [u8; 32] = bulwark_crypto::rng::random_array().unwrap();
        let source = Engine::new(
            Arc::new(InMemoryKeyStore::new()),
            MasterKey::from_bytes(master_bytes),
            test_anomaly_config(),
        );
        let target = Engine::new(
            Arc::new(InMemoryKeyStore::new()),
            MasterKey::from_bytes(master_bytes),
            test_anomaly_config(),
        );

        let alice = standard(10);
        let bob = standard(20);

        let aes = source
            .create_key(&alice, "aes", "AES-256-CBC")
            .await
            .unwrap();
        source
            .create_key(&alice, "rsa", "RSA-2048")
            .await
            .unwrap();
        source
            .create_key(&alice, "ecc", "ECC-P256")
            .await
            .unwrap();
        let envelope = source
            .encrypt(&alice, aes.internal_id, b"carried across", "r")
            .await
            .unwrap();

        let artifact = source.export_backup(&alice).await.unwrap();
        assert_eq!(hex_segments(&artifact).len(), 2);

        let restored = target.import_backup(&bob, &artifact).await.unwrap();
        assert_eq!(restored, 3);

        // Bob owns the restored keys and can decrypt Alice's ciphertext.
        let bobs = target.list_keys(&bob).await.unwrap();
        assert_eq!(bobs.len(), 3);
        let restored_aes = bobs
            .iter()
            .find(|k| k.public_id == aes.public_id)
            .expect("restored key keeps its public id");
        let plaintext = target
            .decrypt(&bob, restored_aes.internal_id, &envelope, "r")
            .await
            .unwrap();
        assert_eq!(plaintext, b"carried across");
    }

    #[tokio::test]
    async fn test_backup_import_is_idempotent() {
        let engine = test_engine();
        let alice = standard(10);
        engine
            .create_key(&alice, "a", "AES-128-CBC")
            .await
            .unwrap();
        engine
            .create_key(&alice, "b", "AES-256-GCM")
            .await
            .unwrap();

        let artifact = engine.export_backup(&alice).await.unwrap();
        // All public_ids already exist: nothing to restore.
        assert_eq!(engine.import_backup(&alice, &artifact).await.unwrap(), 0);
        assert_eq!(engine.list_keys(&alice).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backup_preserves_status() {
        let master_bytes: [u8; 32] = bulwark_crypto::rng::random_array().unwrap();
        let source = Engine::new(
            Arc::new(InMemoryKeyStore::new()),
            MasterKey::from_bytes(master_bytes),
            test_anomaly_config(),
        );
        let target = Engine::new(
            Arc::new(InMemoryKeyStore::new()),
            MasterKey::from_bytes(master_bytes),
            test_anomaly_config(),
        );
        let alice = standard(10);

        let key = source
            .create_key(&alice, "doc", "AES-128-CBC")
            .await
            .unwrap();
        source.revoke_key(&alice, key.internal_id).await.unwrap();

        let artifact = source.export_backup(&alice).await.unwrap();
        target.import_backup(&alice, &artifact).await.unwrap();

        let restored = target.list_keys(&alice).await.unwrap();
        assert_eq!(restored[0].status, KeyStatus::Revoked);
    }

    #[tokio::test]
    async fn test_backup_empty_set() {
        let engine = test_engine();
        let alice = standard(10);
        let err = engine.export_backup(&alice).await.unwrap_err();
        assert_eq!(err, CoreError::NothingToBackUp);

        let failed = engine
            .audit()
            .query(
                &AuditFilter {
                    action: Some(AuditAction::KeyBackup),
                    status: Some(AuditStatus::Failed),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn test_backup_malformed_artifact() {
        let engine = test_engine();
        let alice = standard(10);

        for bogus in ["garbage", "aa:bb:cc", "zz:zz"] {
            let err = engine.import_backup(&alice, bogus).await.unwrap_err();
            assert_eq!(err, CoreError::MalformedBackup, "accepted {:?}", bogus);
        }

        // A valid envelope under a different master key does not parse.
        let other = test_engine();
        let bob = standard(11);
        other.create_key(&bob, "k", "AES-128-CBC").await.unwrap();
        let foreign = other.export_backup(&bob).await.unwrap();
        let err = engine.import_backup(&alice, &foreign).await.unwrap_err();
        assert_eq!(err, CoreError::MalformedBackup);
    }

    // === Anomaly detection ===

    #[tokio::test]
    async fn test_high_volume_alert() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        for i in 0..25 {
            engine
                .encrypt(&alice, key.internal_id, b"burst", &format!("op-{}", i))
                .await
                .unwrap();
        }
        let anomaly = engine.analyze(alice.id).unwrap().expect("burst detected");
        assert_eq!(anomaly.kind, AnomalyKind::HighVolume);
        assert_eq!(anomaly.severity, AnomalySeverity::Medium);

        let alerts = engine
            .security_alerts(&alice, None, 100)
            .await
            .unwrap();
        let high_volume: Vec<_> = alerts
            .iter()
            .filter(|r| r.resource.as_deref() == Some("high_volume"))
            .collect();
        assert_eq!(high_volume.len(), 1);
        assert_eq!(high_volume[0].status, AuditStatus::Warning);
        assert_eq!(
            high_volume[0].details.get("severity").and_then(|v| v.as_str()),
            Some("medium")
        );
    }

    #[tokio::test]
    async fn test_high_failure_rate() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        engine
            .encrypt(&alice, key.internal_id, b"ok", "r")
            .await
            .unwrap();
        for _ in 0..3 {
            let _ = engine
                .decrypt(&alice, key.internal_id, "bogus", "r")
                .await
                .unwrap_err();
        }

        // 3 failures over 4 operations: well past the 0.30 threshold.
        let anomaly = engine.analyze(alice.id).unwrap().expect("failures detected");
        assert_eq!(anomaly.kind, AnomalyKind::HighFailureRate);
        assert_eq!(anomaly.severity, AnomalySeverity::High);
    }

    #[tokio::test]
    async fn test_revoked_key_usage() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        // Enough successes to keep the failure ratio under 0.30...
        let envelope = engine
            .encrypt(&alice, key.internal_id, b"x", "r")
            .await
            .unwrap();
        for _ in 0..4 {
            engine
                .encrypt(&alice, key.internal_id, b"x", "r")
                .await
                .unwrap();
        }
        engine.revoke_key(&alice, key.internal_id).await.unwrap();
        // ...then two attempts against the revoked key.
        for _ in 0..2 {
            let _ = engine
                .decrypt(&alice, key.internal_id, &envelope, "r")
                .await
                .unwrap_err();
        }

        let anomaly = engine.analyze(alice.id).unwrap().expect("revoked usage");
        assert_eq!(anomaly.kind, AnomalyKind::RevokedKeyUsage);
        assert_eq!(anomaly.severity, AnomalySeverity::High);
    }

    #[tokio::test]
    async fn test_high_volume_wins_over_other_detectors() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        let envelope = engine
            .encrypt(&alice, key.internal_id, b"x", "r")
            .await
            .unwrap();
        for _ in 0..24 {
            engine
                .encrypt(&alice, key.internal_id, b"x", "r")
                .await
                .unwrap();
        }
        engine.revoke_key(&alice, key.internal_id).await.unwrap();
        for _ in 0..2 {
            let _ = engine
                .decrypt(&alice, key.internal_id, &envelope, "r")
                .await
                .unwrap_err();
        }

        let anomaly = engine.analyze(alice.id).unwrap().expect("anomaly");
        assert_eq!(anomaly.kind, AnomalyKind::HighVolume);
    }

    #[tokio::test]
    async fn test_unusual_time_detector() {
        let audit = Arc::new(AuditLog::new());
        // An empty working window marks every hour as outside it.
        let config = AnomalyConfig {
            working_hours: (0, 0),
            ..AnomalyConfig::default()
        };
        let detector = AnomalyDetector::new(config, Arc::clone(&audit));

        detector.observe(&OperationRecord {
            id: 1,
            actor: 10,
            key_internal_id: Some(1),
            kind: OperationKind::Encrypt,
            algorithm: KeyAlgorithm::Aes256Cbc,
            resource_label: None,
            outcome: Outcome::Success,
            timestamp: Utc::now(),
        });

        let anomaly = detector.analyze(10).unwrap().expect("off-hours hit");
        assert_eq!(anomaly.kind, AnomalyKind::UnusualTime);
        assert_eq!(anomaly.severity, AnomalySeverity::Low);

        // A full-day window never fires.
        let always_open = AnomalyDetector::new(
            AnomalyConfig {
                working_hours: (0, 24),
                ..AnomalyConfig::default()
            },
            audit,
        );
        always_open.observe(&OperationRecord {
            id: 2,
            actor: 11,
            key_internal_id: Some(1),
            kind: OperationKind::Encrypt,
            algorithm: KeyAlgorithm::Aes256Cbc,
            resource_label: None,
            outcome: Outcome::Success,
            timestamp: Utc::now(),
        });
        assert!(always_open.analyze(11).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_anomaly_suppression_and_no_feedback() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();

        engine
            .encrypt(&alice, key.internal_id, b"ok", "r")
            .await
            .unwrap();
        for _ in 0..3 {
            let _ = engine
                .decrypt(&alice, key.internal_id, "bogus", "r")
                .await
                .unwrap_err();
        }

        // Repeated analysis keeps detecting but records only one alert;
        // the alert itself never feeds back into the failure counts.
        for _ in 0..5 {
            assert!(engine.analyze(alice.id).unwrap().is_some());
        }
        let alerts = engine.security_alerts(&alice, None, 100).await.unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_alerts_resets_state() {
        let engine = test_engine();
        let alice = standard(10);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();
        for _ in 0..25 {
            engine
                .encrypt(&alice, key.internal_id, b"x", "r")
                .await
                .unwrap();
        }
        assert!(engine.analyze(alice.id).unwrap().is_some());

        engine.clear_alerts(&alice).await.unwrap();
        // Cache dropped: the burst no longer registers.
        assert!(engine.analyze(alice.id).unwrap().is_none());

        let cleared = engine
            .audit()
            .query(
                &AuditFilter {
                    action: Some(AuditAction::AlertsCleared),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(cleared.len(), 1);
    }

    #[tokio::test]
    async fn test_security_alerts_scoping() {
        let engine = test_engine();
        let alice = standard(10);
        let bob = standard(11);
        let key = engine
            .create_key(&alice, "doc", "AES-256-CBC")
            .await
            .unwrap();
        for _ in 0..25 {
            engine
                .encrypt(&alice, key.internal_id, b"x", "r")
                .await
                .unwrap();
        }
        engine.analyze(alice.id).unwrap();

        // Bob sees no alerts of Alice's; an admin filtering on Alice does.
        assert!(engine
            .security_alerts(&bob, None, 100)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            engine
                .security_alerts(&admin(), Some(alice.id), 100)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    // === Master key wrapper ===

    #[tokio::test]
    async fn test_wrap_unwrap_roundtrip() {
        let master = MasterKey::generate().unwrap();
        let (iv, wrapped) = master.wrap(b"sensitive payload").unwrap();
        assert_eq!(iv.len(), 16);
        let payload = master.unwrap(&iv, &wrapped).unwrap();
        assert_eq!(&*payload, b"sensitive payload");
    }

    #[tokio::test]
    async fn test_wrap_uses_fresh_iv_per_call() {
        let master = MasterKey::generate().unwrap();
        let (iv_a, wrapped_a) = master.wrap(b"same payload").unwrap();
        let (iv_b, wrapped_b) = master.wrap(b"same payload").unwrap();
        assert_ne!(iv_a, iv_b);
        assert_ne!(wrapped_a, wrapped_b);
    }

    #[tokio::test]
    async fn test_unwrap_under_wrong_master_fails() {
        let master = MasterKey::generate().unwrap();
        let other = MasterKey::generate().unwrap();
        let (iv, wrapped) = master.wrap(b"payload").unwrap();
        assert!(other.unwrap_material(&iv, &wrapped).is_err());
    }

    #[tokio::test]
    async fn test_material_wrap_roundtrip() {
        let master = MasterKey::generate().unwrap();
        let material = KeyMaterial::symmetric(&[0xAB; 32]);
        let (iv, wrapped) = master.wrap_material(&material).unwrap();
        let back = master.unwrap_material(&iv, &wrapped).unwrap();
        assert_eq!(*back.symmetric_key().unwrap(), vec![0xAB; 32]);
    }

    // === Redaction ===

    #[tokio::test]
    async fn test_redacted_keys_carry_no_material() {
        let engine = test_engine();
        let alice = standard(10);
        engine
            .create_key(&alice, "doc", "RSA-2048")
            .await
            .unwrap();

        let keys = engine.list_keys(&alice).await.unwrap();
        let json = serde_json::to_string(&keys).unwrap();
        assert!(!json.contains("wrapped_material"));
        assert!(!json.contains("wrap_iv"));
        assert!(!json.contains("PRIVATE KEY"));
    }

    // === File backend ===

    #[tokio::test]
    async fn test_file_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let master_bytes: [u8; 32] = bulwark_crypto::rng::random_array().unwrap();

        let public_id;
        let internal_id;
        {
            let store = Arc::new(FileKeyStore::new(dir.path()).unwrap());
            let registry =
                KeyRegistry::new(store, Arc::new(MasterKey::from_bytes(master_bytes)));
            let record = registry
                .create_key(10, "durable", KeyAlgorithm::Aes256Cbc)
                .unwrap();
            public_id = record.public_id.clone();
            internal_id = record.internal_id;
        }

        let store = Arc::new(FileKeyStore::new(dir.path()).unwrap());
        let registry = KeyRegistry::new(
            Arc::clone(&store) as Arc<dyn KeyStore>,
            Arc::new(MasterKey::from_bytes(master_bytes)),
        );
        let found = registry.get_key_by_public_id(&public_id).unwrap().unwrap();
        assert_eq!(found.internal_id, internal_id);
        // Ids keep counting past what is on disk
        assert!(store.next_id().unwrap() > internal_id);
        // And the material still unwraps under the same master key
        registry.unwrap_material(internal_id).unwrap();
    }

    // === Configuration ===

    #[tokio::test]
    async fn test_config_master_key_validation() {
        let mut config = CoreConfig::default();
        assert!(config.master_key_bytes().unwrap().is_none());

        config.master_key_hex = Some("zz".into());
        assert!(config.master_key_bytes().is_err());

        config.master_key_hex = Some(hex::encode([7u8; 16]));
        assert!(config.master_key_bytes().is_err());

        config.master_key_hex = Some(hex::encode([7u8; 32]));
        assert_eq!(config.master_key_bytes().unwrap(), Some([7u8; 32]));
    }
}
