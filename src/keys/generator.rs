// ABOUTME: RSA key pair generation and PEM import/export for RS256 token signing
// ABOUTME: Enforces the 2048-bit floor and converts keys into jsonwebtoken encoding/decoding keys
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use crate::constants::keys::MIN_RSA_KEY_BITS;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};

/// Key size actually used for a request: anything below the floor is upgraded
#[must_use]
pub const fn effective_key_bits(requested: usize) -> usize {
    if requested < MIN_RSA_KEY_BITS {
        MIN_RSA_KEY_BITS
    } else {
        requested
    }
}

/// RSA key pair with creation metadata
#[derive(Clone)]
pub struct RsaKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    /// Key creation timestamp
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("bits", &self.bits())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl RsaKeyPair {
    /// Generate a new key pair; `bits` below 2048 are silently upgraded
    ///
    /// CPU-bound for hundreds of milliseconds; async callers should run it
    /// on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the system RNG fails
    pub fn generate(bits: usize) -> AppResult<Self> {
        use rand::rngs::OsRng;

        let bits = effective_key_bits(bits);
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, bits).map_err(|e| {
            AppError::key_material(format!("Failed to generate {bits}-bit RSA key: {e}"))
        })?;
        let public_key = RsaPublicKey::from(&private_key);

        Ok(Self {
            private_key,
            public_key,
            created_at: Utc::now(),
        })
    }

    /// Import a private key from PKCS#8 PEM
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the PEM cannot be parsed
    pub fn from_private_key_pem(pem: &str) -> AppResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| AppError::key_material(format!("Failed to parse private key PEM: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        Ok(Self {
            private_key,
            public_key,
            created_at: Utc::now(),
        })
    }

    /// Modulus size in bits
    #[must_use]
    pub fn bits(&self) -> usize {
        self.public_key.size() * 8
    }

    /// Export private key as PKCS#8 PEM
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if PEM encoding fails
    pub fn private_key_pem(&self) -> AppResult<String> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| AppError::key_material(format!("Failed to export private key: {e}")))
    }

    /// Export public key as SPKI PEM
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if PEM encoding fails
    pub fn public_key_pem(&self) -> AppResult<String> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::key_material(format!("Failed to export public key: {e}")))
    }

    /// Encoding key for RS256 signing
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the key cannot be converted
    pub fn encoding_key(&self) -> AppResult<EncodingKey> {
        let pem = self.private_key_pem()?;
        EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AppError::key_material(format!("Failed to create encoding key: {e}")))
    }

    /// Decoding key for RS256 verification
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the key cannot be converted
    pub fn decoding_key(&self) -> AppResult<DecodingKey> {
        decoding_key_from_pem(&self.public_key_pem()?)
    }
}

/// Parse and validate an SPKI PEM public key into a decoding key
///
/// The key is parsed as RSA first, so garbage is rejected here rather than at
/// verification time.
///
/// # Errors
///
/// Returns `KeyMaterialError` if the PEM is not a valid RSA public key
pub fn decoding_key_from_pem(pem: &str) -> AppResult<DecodingKey> {
    let public_key = RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| AppError::key_material(format!("Invalid RSA public key PEM: {e}")))?;

    if public_key.size() * 8 < MIN_RSA_KEY_BITS {
        return Err(AppError::key_material(format!(
            "RSA public key is {} bits, minimum is {MIN_RSA_KEY_BITS}",
            public_key.size() * 8
        )));
    }

    DecodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| AppError::key_material(format!("Failed to create decoding key: {e}")))
}
