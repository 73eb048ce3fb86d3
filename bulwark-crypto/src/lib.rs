//! # Bulwark Crypto
//!
//! Primitive layer for the Bulwark privacy core.
//!
//! Pure, stateless functions over byte slices: AES-CBC and AES-256-GCM,
//! RSA-2048 (PKCS#1 v1.5), ECDSA and ECDH on P-256, SHA-256, and a CSPRNG.
//! Key material crosses this boundary as raw bytes or PEM text; nothing here
//! persists, authorizes, or logs.
//!
//! ## Quick Start
//!
//! ```rust
//! use bulwark_crypto::{cipher, rng, wire};
//!
//! let key = rng::random_bytes(32).unwrap();
//! let iv = rng::random_bytes(16).unwrap();
//!
//! let ciphertext = cipher::aes_cbc_encrypt(&key, &iv, b"secret").unwrap();
//! let envelope = wire::encode_aes(&iv, &ciphertext);
//!
//! let (iv2, ct2) = wire::parse_aes(&envelope, 16).unwrap();
//! let plaintext = cipher::aes_cbc_decrypt(&key, &iv2, &ct2).unwrap();
//! assert_eq!(plaintext, b"secret");
//! ```
//!
//! ## Failure discipline
//!
//! Every invalid input (wrong key length, malformed PEM, padding failure,
//! bad signature) maps to one of the four [`PrimitiveError`] variants.
//! Envelope parsing has its own uniform [`wire::EnvelopeError`].

#![deny(unsafe_code)]

pub mod cipher;
pub mod ecc;
pub mod error;
pub mod kdf;
pub mod rng;
pub mod rsa;
pub mod wire;

pub use error::PrimitiveError;
