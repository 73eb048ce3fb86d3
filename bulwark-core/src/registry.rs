//! Key registry: creation, lookup, lifecycle transitions, material access.
//!
//! Authorization happens before registry calls (the policy guard); the
//! registry enforces only existence and lifecycle status.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use bulwark_crypto::{ecc, rng, rsa};

use crate::error::CoreError;
use crate::master::MasterKey;
use crate::storage::KeyStore;
use crate::types::{ActorId, KeyAlgorithm, KeyId, KeyMaterial, KeyRecord, KeyStatus};

pub struct KeyRegistry {
    store: Arc<dyn KeyStore>,
    master: Arc<MasterKey>,
}

impl KeyRegistry {
    pub fn new(store: Arc<dyn KeyStore>, master: Arc<MasterKey>) -> Self {
        Self { store, master }
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Generate fresh material for `algorithm`, wrap it, persist the record.
    pub fn create_key(
        &self,
        owner: ActorId,
        name: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<KeyRecord, CoreError> {
        let material = generate_material(algorithm)?;
        let (wrap_iv, wrapped_material) = self.master.wrap_material(&material)?;

        let now = Utc::now();
        let public_id = self.mint_public_id(now)?;
        let internal_id = self.store.next_id()?;

        let record = KeyRecord {
            internal_id,
            public_id,
            name: name.to_string(),
            owner,
            algorithm,
            wrapped_material,
            wrap_iv,
            status: KeyStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: None,
            last_used_at: None,
        };
        self.store.put(&record)?;
        Ok(record)
    }

    /// `K-<millis>-<8 hex>`, globally unique. The random suffix makes
    /// same-millisecond collisions vanishingly rare; the loop makes them
    /// impossible.
    fn mint_public_id(&self, now: DateTime<Utc>) -> Result<String, CoreError> {
        loop {
            let suffix = rng::random_bytes(4)?;
            let candidate = format!("K-{}-{}", now.timestamp_millis(), hex::encode(suffix));
            if self.store.get_by_public_id(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get_key(&self, id: KeyId) -> Result<Option<KeyRecord>, CoreError> {
        self.store.get(id)
    }

    pub fn get_key_by_public_id(&self, public_id: &str) -> Result<Option<KeyRecord>, CoreError> {
        self.store.get_by_public_id(public_id)
    }

    pub fn list_keys_for(&self, owner: ActorId) -> Result<Vec<KeyRecord>, CoreError> {
        self.store.list_for_owner(owner)
    }

    pub fn list_all(&self) -> Result<Vec<KeyRecord>, CoreError> {
        self.store.list()
    }

    // -----------------------------------------------------------------------
    // Material access
    // -----------------------------------------------------------------------

    /// Unwrap a key's material for use. Fails with `KeyNotActive` unless the
    /// key is active; on success advances `last_used_at` (monotonically,
    /// under the store's write lock).
    pub fn unwrap_material(&self, id: KeyId) -> Result<KeyMaterial, CoreError> {
        let record = self.store.get(id)?.ok_or(CoreError::KeyUnknown(id))?;
        if !record.status.is_active() {
            return Err(CoreError::KeyNotActive(id));
        }
        let material = self
            .master
            .unwrap_material(&record.wrap_iv, &record.wrapped_material)?;

        self.store.update(id, &mut |rec| {
            let now = Utc::now();
            if rec.last_used_at.map_or(true, |prev| prev < now) {
                rec.last_used_at = Some(now);
            }
        })?;
        Ok(material)
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    /// Revoke a key. Revoking an already non-active key is a no-op reported
    /// as success; the status machine is monotonic either way.
    pub fn revoke(&self, id: KeyId) -> Result<(), CoreError> {
        let record = self.store.get(id)?.ok_or(CoreError::KeyUnknown(id))?;
        if !record.status.can_transition_to(KeyStatus::Revoked) {
            return Ok(());
        }
        self.store.update(id, &mut |rec| {
            rec.status = KeyStatus::Revoked;
            rec.updated_at = Utc::now();
        })?;
        Ok(())
    }

    /// Expire a key. Reserved for scheduled lifecycle; no core operation
    /// calls this on its own.
    pub fn mark_expired(&self, id: KeyId) -> Result<(), CoreError> {
        let record = self.store.get(id)?.ok_or(CoreError::KeyUnknown(id))?;
        if !record.status.can_transition_to(KeyStatus::Expired) {
            return Ok(());
        }
        self.store.update(id, &mut |rec| {
            rec.status = KeyStatus::Expired;
            rec.updated_at = Utc::now();
        })?;
        Ok(())
    }

    /// Schedule (or cancel) expiration for a key.
    pub fn set_expiration(
        &self,
        id: KeyId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        self.store.get(id)?.ok_or(CoreError::KeyUnknown(id))?;
        self.store.update(id, &mut |rec| {
            rec.expires_at = expires_at;
            rec.updated_at = Utc::now();
        })?;
        Ok(())
    }

    /// Sweep active keys whose `expires_at` has passed. Returns the number
    /// expired. Scheduling is the caller's concern.
    pub fn expire_due(&self) -> Result<usize, CoreError> {
        let now = Utc::now();
        let mut expired = 0;
        for record in self.store.list()? {
            if record.status.is_active()
                && record.expires_at.map_or(false, |at| at <= now)
            {
                self.mark_expired(record.internal_id)?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    // -----------------------------------------------------------------------
    // Restore (backup import)
    // -----------------------------------------------------------------------

    /// Insert a restored key unless its `public_id` already exists.
    /// Ownership goes to the importer; algorithm, status, material, and
    /// creation time are preserved. Returns whether a record was inserted.
    pub fn restore_key(
        &self,
        owner: ActorId,
        public_id: &str,
        name: &str,
        algorithm: KeyAlgorithm,
        status: KeyStatus,
        created_at: DateTime<Utc>,
        wrapped_material: Vec<u8>,
        wrap_iv: Vec<u8>,
    ) -> Result<bool, CoreError> {
        if self.store.get_by_public_id(public_id)?.is_some() {
            return Ok(false);
        }
        let internal_id = self.store.next_id()?;
        let record = KeyRecord {
            internal_id,
            public_id: public_id.to_string(),
            name: name.to_string(),
            owner,
            algorithm,
            wrapped_material,
            wrap_iv,
            status,
            created_at,
            updated_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
        };
        self.store.put(&record)?;
        Ok(true)
    }
}

/// Fresh material per algorithm: random bytes for AES, a generated keypair
/// for RSA-2048 and P-256.
fn generate_material(algorithm: KeyAlgorithm) -> Result<KeyMaterial, CoreError> {
    match algorithm {
        KeyAlgorithm::Aes128Cbc => Ok(KeyMaterial::symmetric(&rng::random_bytes(16)?)),
        KeyAlgorithm::Aes256Cbc | KeyAlgorithm::Aes256Gcm => {
            Ok(KeyMaterial::symmetric(&rng::random_bytes(32)?))
        }
        KeyAlgorithm::Rsa2048 => {
            let pair = rsa::generate_keypair()?;
            Ok(KeyMaterial::keypair(
                pair.public_pem,
                pair.private_pem.to_string(),
            ))
        }
        KeyAlgorithm::EccP256 => {
            let pair = ecc::generate_keypair()?;
            Ok(KeyMaterial::keypair(
                pair.public_pem,
                pair.private_pem.to_string(),
            ))
        }
    }
}
