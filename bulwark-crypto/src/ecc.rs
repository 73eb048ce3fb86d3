//! P-256 (prime256v1): keypairs, ECDSA over SHA-256, ECDH.
//!
//! Public points cross module boundaries as uncompressed SEC1 bytes
//! (65 bytes); PEM is SPKI/PKCS#8. `PublicKey::from_sec1_bytes` rejects
//! points not on the curve, which is the validation the hybrid decrypt
//! path relies on.

use p256::ecdh::{diffie_hellman, EphemeralSecret};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::{PublicKey, SecretKey};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::error::PrimitiveError;

/// Uncompressed SEC1 point length: 0x04 || x[32] || y[32].
pub const POINT_BYTES: usize = 65;

/// A freshly generated P-256 keypair, PEM-encoded.
pub struct EccKeypairPem {
    pub public_pem: String,
    pub private_pem: Zeroizing<String>,
}

/// Sender side of the hybrid scheme: an ephemeral keypair plus the ECDH
/// shared secret against the recipient's public key.
pub struct EphemeralAgreement {
    /// Uncompressed SEC1 encoding of the ephemeral public key.
    pub public_point: Vec<u8>,
    pub shared_secret: Zeroizing<Vec<u8>>,
}

/// Generate a keypair on prime256v1.
pub fn generate_keypair() -> Result<EccKeypairPem, PrimitiveError> {
    let sk = SecretKey::random(&mut OsRng);
    let private_pem = sk
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|_| PrimitiveError::BadKey)?;
    let public_pem = sk
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|_| PrimitiveError::BadKey)?;
    Ok(EccKeypairPem {
        public_pem,
        private_pem,
    })
}

/// Draw an ephemeral keypair and agree with the recipient's public key.
pub fn ephemeral_agree(recipient_public_pem: &str) -> Result<EphemeralAgreement, PrimitiveError> {
    let recipient = PublicKey::from_public_key_pem(recipient_public_pem)
        .map_err(|_| PrimitiveError::BadKey)?;
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let public_point = ephemeral
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();
    let shared = ephemeral.diffie_hellman(&recipient);
    Ok(EphemeralAgreement {
        public_point,
        shared_secret: Zeroizing::new(shared.raw_secret_bytes().to_vec()),
    })
}

/// Recipient side: rebuild the shared secret from a peer's SEC1 point.
pub fn ecdh_agree(
    private_key_pem: &str,
    peer_point: &[u8],
) -> Result<Zeroizing<Vec<u8>>, PrimitiveError> {
    let sk = SecretKey::from_pkcs8_pem(private_key_pem).map_err(|_| PrimitiveError::BadKey)?;
    let peer = PublicKey::from_sec1_bytes(peer_point).map_err(|_| PrimitiveError::BadKey)?;
    let shared = diffie_hellman(sk.to_nonzero_scalar(), peer.as_affine());
    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
}

/// ECDSA sign over SHA-256; returns a DER-encoded signature.
pub fn ecdsa_sign(private_key_pem: &str, message: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    let sk = SecretKey::from_pkcs8_pem(private_key_pem).map_err(|_| PrimitiveError::BadKey)?;
    let signer = SigningKey::from(sk);
    let signature: Signature = signer.sign(message);
    Ok(signature.to_der().as_bytes().to_vec())
}

/// ECDSA verify over SHA-256. A malformed signature is `BadSignature`;
/// a well-formed non-matching one is `Ok(false)`.
pub fn ecdsa_verify(
    public_key_pem: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, PrimitiveError> {
    let pk = PublicKey::from_public_key_pem(public_key_pem).map_err(|_| PrimitiveError::BadKey)?;
    let verifier = VerifyingKey::from(pk);
    let signature = Signature::from_der(signature).map_err(|_| PrimitiveError::BadSignature)?;
    Ok(verifier.verify(message, &signature).is_ok())
}
