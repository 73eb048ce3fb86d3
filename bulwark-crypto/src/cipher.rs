//! Symmetric ciphers: AES-CBC (PKCS#7) and AES-256-GCM.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use crate::error::PrimitiveError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const AES_BLOCK_BYTES: usize = 16;
/// CBC initialization vector size.
pub const IV_BYTES: usize = 16;
/// GCM nonce size.
pub const GCM_NONCE_BYTES: usize = 12;

/// AES-CBC encrypt with PKCS#7 padding. Key must be 16 or 32 bytes.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    if iv.len() != IV_BYTES {
        return Err(PrimitiveError::BadKey);
    }
    match key.len() {
        16 => Ok(Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| PrimitiveError::BadKey)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        32 => Ok(Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| PrimitiveError::BadKey)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        _ => Err(PrimitiveError::BadKey),
    }
}

/// AES-CBC decrypt. Fails with `BadPadding` when the PKCS#7 check fails.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    if iv.len() != IV_BYTES {
        return Err(PrimitiveError::BadKey);
    }
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_BYTES != 0 {
        return Err(PrimitiveError::BadPadding);
    }
    match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| PrimitiveError::BadKey)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| PrimitiveError::BadPadding),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| PrimitiveError::BadKey)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| PrimitiveError::BadPadding),
        _ => Err(PrimitiveError::BadKey),
    }
}

/// AES-256-GCM seal. The 16-byte tag is appended to the ciphertext.
pub fn aes_gcm_encrypt(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    if nonce.len() != GCM_NONCE_BYTES {
        return Err(PrimitiveError::BadKey);
    }
    let gcm = Aes256Gcm::new_from_slice(key).map_err(|_| PrimitiveError::BadKey)?;
    gcm.encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| PrimitiveError::BadKey)
}

/// AES-256-GCM open. Fails with `BadSignature` when the tag does not verify.
pub fn aes_gcm_decrypt(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    if nonce.len() != GCM_NONCE_BYTES {
        return Err(PrimitiveError::BadKey);
    }
    let gcm = Aes256Gcm::new_from_slice(key).map_err(|_| PrimitiveError::BadKey)?;
    gcm.decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| PrimitiveError::BadSignature)
}
