// ABOUTME: Issuer-side key version store holding the active private key and version counter
// ABOUTME: Persists keys and version metadata to disk with staged writes committed after publish
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! Issuer key store
//!
//! Layout of the key directory:
//!
//! | File | Content |
//! |---|---|
//! | `private.pem` | active private key, PKCS#8 PEM, mode 0600 |
//! | `public.pem` | active public key, SPKI PEM |
//! | `key_version.json` | `{version, issued_at, service_name}` |
//!
//! A rotation first writes `*.next` files, and renames them over the live
//! files only once the new public key has been published.

use super::generator::RsaKeyPair;
use super::KeyVersionRecord;
use crate::constants::keys::{PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, VERSION_FILE};
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use jsonwebtoken::EncodingKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const STAGED_SUFFIX: &str = "next";

/// Persisted version metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionMetadata {
    version: u64,
    issued_at: DateTime<Utc>,
    service_name: String,
}

/// Active signing key snapshot handed to the token issuer
#[derive(Clone)]
pub struct SigningKey {
    /// Version placed in the token header `kid`
    pub version: u64,
    /// RS256 encoding key
    pub encoding_key: EncodingKey,
}

struct ActiveKey {
    version: u64,
    key_pair: Arc<RsaKeyPair>,
    encoding_key: EncodingKey,
    public_key_pem: String,
    issued_at: DateTime<Utc>,
}

impl ActiveKey {
    fn new(version: u64, key_pair: RsaKeyPair, issued_at: DateTime<Utc>) -> AppResult<Self> {
        Ok(Self {
            version,
            encoding_key: key_pair.encoding_key()?,
            public_key_pem: key_pair.public_key_pem()?,
            key_pair: Arc::new(key_pair),
            issued_at,
        })
    }
}

/// A generated key written to staging files but not yet authoritative
pub struct StagedKey {
    version: u64,
    key_pair: RsaKeyPair,
    public_key_pem: String,
    issued_at: DateTime<Utc>,
    staged_files: Vec<(PathBuf, PathBuf)>,
}

impl StagedKey {
    /// Version the key will be registered under
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// SPKI PEM to publish
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Issue timestamp to publish
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// Issuer-side store of the active private key and its version
pub struct KeyVersionStore {
    key_dir: Option<PathBuf>,
    service_name: String,
    active: RwLock<ActiveKey>,
}

impl KeyVersionStore {
    /// Memory-only store seeded with `key_pair` at `version`
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the key cannot be converted for signing
    pub fn in_memory(key_pair: RsaKeyPair, version: u64, service_name: &str) -> AppResult<Self> {
        let issued_at = key_pair.created_at;
        Ok(Self {
            key_dir: None,
            service_name: service_name.to_owned(),
            active: RwLock::new(ActiveKey::new(version, key_pair, issued_at)?),
        })
    }

    /// Load the persisted key from `key_dir`, or generate and persist a version 0 key
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if existing files are unreadable or corrupt,
    /// or if a bootstrap key cannot be generated or written
    pub async fn load_or_bootstrap(
        key_dir: &Path,
        key_bits: usize,
        service_name: &str,
    ) -> AppResult<Self> {
        tokio::fs::create_dir_all(key_dir).await.map_err(|e| {
            AppError::key_material(format!(
                "Failed to create key directory {}: {e}",
                key_dir.display()
            ))
        })?;

        let private_path = key_dir.join(PRIVATE_KEY_FILE);
        let active = if tokio::fs::try_exists(&private_path).await.unwrap_or(false) {
            let pem = read_file(&private_path).await?;
            let key_pair = RsaKeyPair::from_private_key_pem(&pem)?;
            let metadata = Self::read_metadata(key_dir).await?;
            info!(
                key_version = metadata.version,
                "Loaded signing key from {}",
                key_dir.display()
            );
            ActiveKey::new(metadata.version, key_pair, metadata.issued_at)?
        } else {
            info!(
                "No signing key in {}, generating bootstrap key",
                key_dir.display()
            );
            let key_pair = generate_blocking(key_bits).await?;
            let issued_at = key_pair.created_at;
            let active = ActiveKey::new(0, key_pair, issued_at)?;
            write_key_files(
                key_dir,
                "",
                &active.key_pair,
                &active.public_key_pem,
                &VersionMetadata {
                    version: 0,
                    issued_at,
                    service_name: service_name.to_owned(),
                },
            )
            .await?;
            active
        };

        Ok(Self {
            key_dir: Some(key_dir.to_path_buf()),
            service_name: service_name.to_owned(),
            active: RwLock::new(active),
        })
    }

    async fn read_metadata(key_dir: &Path) -> AppResult<VersionMetadata> {
        let path = key_dir.join(VERSION_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AppError::key_material(format!("Corrupt key version file {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Key version file {} missing, assuming version 0",
                    path.display()
                );
                Ok(VersionMetadata {
                    version: 0,
                    issued_at: Utc::now(),
                    service_name: String::new(),
                })
            }
            Err(e) => Err(AppError::key_material(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Name of the issuing service
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Current key version
    pub async fn current_version(&self) -> u64 {
        self.active.read().await.version
    }

    /// Snapshot of the active signing key
    pub async fn signing_key(&self) -> SigningKey {
        let active = self.active.read().await;
        SigningKey {
            version: active.version,
            encoding_key: active.encoding_key.clone(),
        }
    }

    /// Public description of the active key
    pub async fn current_record(&self) -> KeyVersionRecord {
        let active = self.active.read().await;
        KeyVersionRecord {
            version: active.version,
            public_key_pem: active.public_key_pem.clone(),
            issued_at: active.issued_at,
            issuer: self.service_name.clone(),
        }
    }

    /// Active key pair
    pub async fn key_pair(&self) -> Arc<RsaKeyPair> {
        Arc::clone(&self.active.read().await.key_pair)
    }

    /// Write a freshly generated key to staging files under `version`
    ///
    /// The active key is untouched until [`Self::commit`].
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the key cannot be exported or written
    pub async fn stage(&self, version: u64, key_pair: RsaKeyPair) -> AppResult<StagedKey> {
        let public_key_pem = key_pair.public_key_pem()?;
        let issued_at = key_pair.created_at;

        let staged_files = match &self.key_dir {
            Some(dir) => {
                write_key_files(
                    dir,
                    STAGED_SUFFIX,
                    &key_pair,
                    &public_key_pem,
                    &VersionMetadata {
                        version,
                        issued_at,
                        service_name: self.service_name.clone(),
                    },
                )
                .await?
            }
            None => Vec::new(),
        };

        Ok(StagedKey {
            version,
            key_pair,
            public_key_pem,
            issued_at,
            staged_files,
        })
    }

    /// Make a staged key authoritative: swap it in and move its files into place
    ///
    /// The in-memory swap happens first and always succeeds once the key has
    /// been published; a failed rename is logged and leaves the previous
    /// files on disk.
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the staged key cannot be converted for signing
    pub async fn commit(&self, staged: StagedKey) -> AppResult<u64> {
        let StagedKey {
            version,
            key_pair,
            issued_at,
            staged_files,
            ..
        } = staged;

        let next = ActiveKey::new(version, key_pair, issued_at)?;
        *self.active.write().await = next;

        for (staged_path, live_path) in &staged_files {
            if let Err(e) = tokio::fs::rename(staged_path, live_path).await {
                error!(
                    key_version = version,
                    "Failed to move {} into place, key is active in memory only: {}",
                    staged_path.display(),
                    e
                );
            }
        }

        Ok(version)
    }

    /// Drop a staged key and remove its files
    pub async fn discard(&self, staged: StagedKey) {
        for (staged_path, _) in &staged.staged_files {
            if let Err(e) = tokio::fs::remove_file(staged_path).await {
                warn!("Failed to remove staged key file {}: {}", staged_path.display(), e);
            }
        }
    }
}

/// Generate a key pair on the blocking pool
///
/// # Errors
///
/// Returns `KeyMaterialError` if generation fails or the worker panics
pub async fn generate_blocking(bits: usize) -> AppResult<RsaKeyPair> {
    tokio::task::spawn_blocking(move || RsaKeyPair::generate(bits))
        .await
        .map_err(|e| AppError::key_material(format!("Key generation task failed: {e}")))?
}

async fn read_file(path: &Path) -> AppResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::key_material(format!("Failed to read {}: {e}", path.display())))
}

/// Write key files; with an empty suffix they land directly on the live paths
/// and no staged pairs are returned
async fn write_key_files(
    dir: &Path,
    suffix: &str,
    key_pair: &RsaKeyPair,
    public_key_pem: &str,
    metadata: &VersionMetadata,
) -> AppResult<Vec<(PathBuf, PathBuf)>> {
    let private_pem = key_pair.private_key_pem()?;
    let metadata_json = serde_json::to_vec_pretty(metadata)?;

    let contents: [(&str, &[u8], bool); 3] = [
        (PRIVATE_KEY_FILE, private_pem.as_bytes(), true),
        (PUBLIC_KEY_FILE, public_key_pem.as_bytes(), false),
        (VERSION_FILE, metadata_json.as_slice(), false),
    ];

    let mut staged = Vec::with_capacity(contents.len());
    for (name, bytes, secret) in contents {
        let live = dir.join(name);
        let target = if suffix.is_empty() {
            live.clone()
        } else {
            dir.join(format!("{name}.{suffix}"))
        };

        tokio::fs::write(&target, bytes).await.map_err(|e| {
            AppError::key_material(format!("Failed to write {}: {e}", target.display()))
        })?;
        if secret {
            restrict_permissions(&target).await?;
        }
        if !suffix.is_empty() {
            staged.push((target, live));
        }
    }

    Ok(staged)
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| {
            AppError::key_material(format!(
                "Failed to restrict permissions on {}: {e}",
                path.display()
            ))
        })
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> AppResult<()> {
    Ok(())
}
