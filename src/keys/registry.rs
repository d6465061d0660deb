// ABOUTME: Verifier-side public key registry mapping key versions to decoding keys
// ABOUTME: Concurrency-safe, idempotent inserts, newest-first snapshots and opt-in retention
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! Public key registry
//!
//! Readers take a shared lock just long enough to clone `Arc`s out of the
//! map; the consumer is the only writer. Entries are validated before they
//! are inserted, so every entry a reader sees holds a usable key.

use super::generator::decoding_key_from_pem;
use super::KeyVersionRecord;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// A registered public key
pub struct RegistryEntry {
    /// Key version
    pub version: u64,
    /// Key ready for RS256 verification
    pub decoding_key: DecodingKey,
    /// SPKI PEM the key was built from
    pub public_key_pem: String,
    /// Issue time reported by the issuer
    pub issued_at: DateTime<Utc>,
    /// Issuing service
    pub issuer: String,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("version", &self.version)
            .field("issued_at", &self.issued_at)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

/// What an insert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New version registered
    Inserted,
    /// Version already present with the same key
    AlreadyPresent,
    /// Version already present with a different key; the existing key was kept
    Conflict,
}

struct Slot {
    entry: Arc<RegistryEntry>,
    superseded_at: Option<DateTime<Utc>>,
}

/// Version to public key map
pub struct PublicKeyRegistry {
    entries: RwLock<BTreeMap<u64, Slot>>,
}

impl PublicKeyRegistry {
    /// Registry seeded with a bootstrap key
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the bootstrap key is not a valid RSA public key
    pub fn with_bootstrap(record: KeyVersionRecord) -> AppResult<Self> {
        let version = record.version;
        let entry = Self::build_entry(record)?;
        let mut entries = BTreeMap::new();
        entries.insert(
            version,
            Slot {
                entry: Arc::new(entry),
                superseded_at: None,
            },
        );
        info!(key_version = version, "Public key registry seeded");

        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    fn build_entry(record: KeyVersionRecord) -> AppResult<RegistryEntry> {
        let decoding_key = decoding_key_from_pem(&record.public_key_pem).map_err(|e| {
            AppError::key_material(format!(
                "Public key for version {} is unusable: {}",
                record.version, e.message
            ))
        })?;

        Ok(RegistryEntry {
            version: record.version,
            decoding_key,
            public_key_pem: record.public_key_pem,
            issued_at: record.issued_at,
            issuer: record.issuer,
        })
    }

    /// Register a key under its version; re-inserting a known version is a no-op
    ///
    /// A late, lower version is stored alongside newer ones and never
    /// replaces them.
    ///
    /// # Errors
    ///
    /// Returns `KeyMaterialError` if the key is not a valid RSA public key;
    /// the registry is unchanged in that case
    pub async fn insert(&self, record: KeyVersionRecord) -> AppResult<InsertOutcome> {
        let version = record.version;

        if let Some(existing) = self.get(version).await {
            return Ok(Self::compare(&existing, &record));
        }

        // Parse outside the write lock; readers stay unblocked during RSA decoding
        let entry = Arc::new(Self::build_entry(record)?);
        let now = Utc::now();

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&version) {
            let existing = Arc::clone(&existing.entry);
            drop(entries);
            return Ok(if existing.public_key_pem == entry.public_key_pem {
                InsertOutcome::AlreadyPresent
            } else {
                InsertOutcome::Conflict
            });
        }

        let is_newest = entries.keys().next_back().is_none_or(|&latest| version > latest);
        for slot in entries.range_mut(..version).map(|(_, slot)| slot) {
            slot.superseded_at.get_or_insert(now);
        }
        entries.insert(
            version,
            Slot {
                entry,
                superseded_at: (!is_newest).then_some(now),
            },
        );
        let total = entries.len();
        drop(entries);

        info!(key_version = version, total, "Registered public key");
        Ok(InsertOutcome::Inserted)
    }

    fn compare(existing: &RegistryEntry, record: &KeyVersionRecord) -> InsertOutcome {
        if existing.public_key_pem == record.public_key_pem {
            InsertOutcome::AlreadyPresent
        } else {
            warn!(
                key_version = record.version,
                "Ignoring different key for an already registered version"
            );
            InsertOutcome::Conflict
        }
    }

    /// Key registered under `version`
    pub async fn get(&self, version: u64) -> Option<Arc<RegistryEntry>> {
        self.entries
            .read()
            .await
            .get(&version)
            .map(|slot| Arc::clone(&slot.entry))
    }

    /// All entries, newest version first
    pub async fn snapshot(&self) -> Vec<Arc<RegistryEntry>> {
        self.entries
            .read()
            .await
            .values()
            .rev()
            .map(|slot| Arc::clone(&slot.entry))
            .collect()
    }

    /// Highest registered version
    pub async fn latest_version(&self) -> Option<u64> {
        self.entries.read().await.keys().next_back().copied()
    }

    /// Registered versions in ascending order
    pub async fn versions(&self) -> Vec<u64> {
        self.entries.read().await.keys().copied().collect()
    }

    /// Number of registered keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry holds no keys
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop keys superseded longer ago than `max_token_lifetime`
    ///
    /// Any token signed with such a key has expired, so removal cannot
    /// reject a live token. The newest entry is never removed.
    pub async fn retire_superseded(&self, max_token_lifetime: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_token_lifetime;
        let mut entries = self.entries.write().await;
        let newest = entries.keys().next_back().copied();

        let before = entries.len();
        entries.retain(|version, slot| {
            Some(*version) == newest || slot.superseded_at.is_none_or(|at| at > cutoff)
        });
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            info!(removed, "Retired superseded public keys");
        }
        removed
    }
}
