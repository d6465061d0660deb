// ABOUTME: RS256 token verification against every registered public key version
// ABOUTME: Tries the kid-named key first, then falls back newest-first across the registry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::Claims;
use crate::errors::{AppError, AppResult};
use crate::keys::{PublicKeyRegistry, RegistryEntry};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use std::sync::Arc;
use tracing::debug;

/// Claims of a token that passed signature and expiry checks
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Decoded claims
    pub claims: Claims,
    /// Version of the key whose signature matched
    pub key_version: u64,
}

/// Outcome of trying one candidate key
enum Attempt {
    Verified(Claims),
    WrongKey,
    Rejected(AppError),
}

/// Verifies tokens against the consumer-side public key registry
#[derive(Clone)]
pub struct TokenVerifier {
    registry: Arc<PublicKeyRegistry>,
}

impl TokenVerifier {
    /// Create a verifier over `registry`
    #[must_use]
    pub const fn new(registry: Arc<PublicKeyRegistry>) -> Self {
        Self { registry }
    }

    /// Registry used for verification
    #[must_use]
    pub const fn registry(&self) -> &Arc<PublicKeyRegistry> {
        &self.registry
    }

    /// Verify the signature, algorithm and expiry of `token`
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the token is malformed, not RS256, expired or
    ///   signed by no registered key
    /// - `KeyMaterialError` if the registry holds no key at all
    pub async fn verify(&self, token: &str) -> AppResult<VerifiedToken> {
        let header = decode_header(token)
            .map_err(|e| AppError::invalid_token(format!("Malformed token header: {e}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(AppError::invalid_token(format!(
                "Unsupported token algorithm: {:?}",
                header.alg
            )));
        }

        let mut candidates = self.registry.snapshot().await;
        if candidates.is_empty() {
            return Err(AppError::key_material(
                "No public keys available for token verification",
            ));
        }

        // A kid naming a known version moves that key to the front.
        if let Some(kid_version) = header.kid.as_deref().and_then(|kid| kid.parse::<u64>().ok()) {
            if let Some(pos) = candidates.iter().position(|e| e.version == kid_version) {
                let entry = candidates.remove(pos);
                candidates.insert(0, entry);
            }
        }

        for entry in &candidates {
            match Self::try_key(token, entry) {
                Attempt::Verified(claims) => {
                    if claims.exp <= Utc::now().timestamp() {
                        return Err(AppError::invalid_token("Token expired"));
                    }
                    return Ok(VerifiedToken {
                        claims,
                        key_version: entry.version,
                    });
                }
                Attempt::WrongKey => {
                    debug!(key_version = entry.version, "Signature did not match key");
                }
                Attempt::Rejected(err) => return Err(err),
            }
        }

        Err(AppError::invalid_token(
            "Token signature does not match any known key",
        ))
    }

    fn try_key(token: &str, entry: &RegistryEntry) -> Attempt {
        let mut validation = Validation::new(Algorithm::RS256);
        // Expiry is checked after the signature so an expired token signed by
        // an unknown key still reads as a signature failure.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        match decode::<Claims>(token, &entry.decoding_key, &validation) {
            Ok(data) => Attempt::Verified(data.claims),
            Err(e) => match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Attempt::WrongKey,
                ErrorKind::ExpiredSignature => {
                    Attempt::Rejected(AppError::invalid_token("Token expired"))
                }
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_)
                | ErrorKind::MissingRequiredClaim(_) => {
                    Attempt::Rejected(AppError::invalid_token(format!("Malformed token: {e}")))
                }
                _ => Attempt::Rejected(AppError::invalid_token(format!(
                    "Token validation failed: {e}"
                ))),
            },
        }
    }
}
