//! RSA-2048 with PKCS#1 v1.5 padding.
//!
//! Keys travel as PEM text: SPKI for the public half, PKCS#8 for the private
//! half. Parsing goes through the `rsa` crate's pkcs8 support, never through
//! hand-rolled ASN.1 scans.

use ::rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use ::rsa::traits::PublicKeyParts;
use ::rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::error::PrimitiveError;

pub const RSA_MODULUS_BITS: usize = 2048;

/// PKCS#1 v1.5 padding overhead in bytes.
pub const RSA_PAD_OVERHEAD: usize = 11;

/// Largest plaintext a 2048-bit key accepts under PKCS#1 v1.5.
pub const RSA_MAX_PLAINTEXT: usize = RSA_MODULUS_BITS / 8 - RSA_PAD_OVERHEAD;

/// A freshly generated RSA keypair, PEM-encoded.
pub struct RsaKeypairPem {
    pub public_pem: String,
    pub private_pem: Zeroizing<String>,
}

/// Generate a 2048-bit keypair.
pub fn generate_keypair() -> Result<RsaKeypairPem, PrimitiveError> {
    let sk = RsaPrivateKey::new(&mut OsRng, RSA_MODULUS_BITS)
        .map_err(|_| PrimitiveError::RngFailure)?;
    let private_pem = sk
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|_| PrimitiveError::BadKey)?;
    let public_pem = sk
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|_| PrimitiveError::BadKey)?;
    Ok(RsaKeypairPem {
        public_pem,
        private_pem,
    })
}

/// Largest plaintext the given public key accepts.
pub fn max_plaintext_len(public_key_pem: &str) -> Result<usize, PrimitiveError> {
    let pk = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|_| PrimitiveError::BadKey)?;
    Ok(pk.size() - RSA_PAD_OVERHEAD)
}

/// PKCS#1 v1.5 encrypt. Input size is bounded by the modulus.
pub fn encrypt(public_key_pem: &str, plaintext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    let pk = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|_| PrimitiveError::BadKey)?;
    pk.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|_| PrimitiveError::BadPadding)
}

/// PKCS#1 v1.5 decrypt.
pub fn decrypt(private_key_pem: &str, ciphertext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    let sk = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|_| PrimitiveError::BadKey)?;
    sk.decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|_| PrimitiveError::BadPadding)
}
