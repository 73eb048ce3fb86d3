//! Envelope wrapping under the process-wide master key.
//!
//! Key material never rests unwrapped: the registry stores the AES-256-CBC
//! ciphertext of the serialized payload plus the per-wrap IV. The master key
//! is immutable for the process lifetime and shared by reference.

use zeroize::Zeroizing;

use bulwark_crypto::{cipher, rng};

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::types::KeyMaterial;

pub const MASTER_KEY_BYTES: usize = 32;
pub const WRAP_IV_BYTES: usize = 16;

/// The process-wide wrapping key.
pub struct MasterKey {
    key: Zeroizing<[u8; MASTER_KEY_BYTES]>,
}

impl MasterKey {
    pub fn from_bytes(key: [u8; MASTER_KEY_BYTES]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Generate a fresh master key.
    pub fn generate() -> Result<Self, CoreError> {
        let key = rng::random_array::<MASTER_KEY_BYTES>().map_err(CoreError::from)?;
        Ok(Self::from_bytes(key))
    }

    /// Resolve the master key from configuration. When none is configured a
    /// fresh key is generated; wrapped material from prior runs is then
    /// undecryptable, which is worth shouting about.
    pub fn from_config(config: &CoreConfig) -> Result<Self, CoreError> {
        match config.master_key_bytes()? {
            Some(key) => Ok(Self::from_bytes(key)),
            None => {
                tracing::warn!(
                    "no master key configured; generated an ephemeral one; \
                     ciphertext durability across restarts is not guaranteed"
                );
                Self::generate()
            }
        }
    }

    /// Wrap a payload: draws a fresh 16-byte IV and returns `(wrap_iv, wrapped)`.
    pub fn wrap(&self, payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CoreError> {
        let iv = rng::random_bytes(WRAP_IV_BYTES)?;
        let wrapped = cipher::aes_cbc_encrypt(self.key.as_ref(), &iv, payload)?;
        Ok((iv, wrapped))
    }

    /// Reverse of [`wrap`](Self::wrap).
    pub fn unwrap(&self, wrap_iv: &[u8], wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CoreError> {
        let payload = cipher::aes_cbc_decrypt(self.key.as_ref(), wrap_iv, wrapped)?;
        Ok(Zeroizing::new(payload))
    }

    /// Serialize and wrap a key payload.
    pub fn wrap_material(&self, material: &KeyMaterial) -> Result<(Vec<u8>, Vec<u8>), CoreError> {
        let payload = Zeroizing::new(
            serde_json::to_vec(material)
                .map_err(|_| CoreError::PersistenceFailure("serialize key payload".into()))?,
        );
        self.wrap(&payload)
    }

    /// Unwrap and deserialize a key payload. A payload that unwraps but does
    /// not parse is corrupt stored state.
    pub fn unwrap_material(
        &self,
        wrap_iv: &[u8],
        wrapped: &[u8],
    ) -> Result<KeyMaterial, CoreError> {
        let payload = self.unwrap(wrap_iv, wrapped)?;
        serde_json::from_slice(&payload)
            .map_err(|_| CoreError::PersistenceFailure("corrupt wrapped payload".into()))
    }
}
