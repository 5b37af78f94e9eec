// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Versioned Data Manager Boundary
//!
//! The get/put/remove façade over the DHT that the core depends on. The DHT
//! transport itself (routing, replication, serialization on the wire) lives
//! outside this crate; only the contract is defined here.
//!
//! ## Addressing
//!
//! Every stored item is addressed by a [`StoreKey`]:
//!
//! | Part | Meaning |
//! |------|---------|
//! | `location` | Whose data (typically a user id) |
//! | `domain` | Which kind of data (`USER-PROFILE`, `USER-PROFILE-TASK`) |
//! | `content` | Which item inside the domain, ordered |
//!
//! ## Optimistic versioning
//!
//! A put names the version it was based on. The store accepts it only if that
//! matches the version currently stored, otherwise it reports a
//! [`StoreError::VersionFork`]. There are no locks and no transactions.
//!
//! ## Content protection
//!
//! The first put to a key registers the public half of the supplied key pair.
//! Later puts and removes must be signed with the matching private key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::crypto::KeyPair;

pub const USER_PROFILE_DOMAIN: &str = "USER-PROFILE";
pub const USER_PROFILE_TASK_DOMAIN: &str = "USER-PROFILE-TASK";

/// Ordered key of an item within a (location, domain) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey(pub String);

impl ContentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key derived from a creation timestamp.
    ///
    /// Zero-padded nanoseconds since the epoch, so lexicographic order equals
    /// chronological order.
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        let nanos = at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1_000));
        Self(format!("{:020}", nanos.max(0)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full address of a stored item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
    pub location: String,
    pub domain: String,
    pub content: ContentKey,
}

impl StoreKey {
    pub fn new(location: impl Into<String>, domain: impl Into<String>, content: ContentKey) -> Self {
        Self {
            location: location.into(),
            domain: domain.into(),
            content,
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.location, self.domain, self.content)
    }
}

/// Version of a stored document: monotonic sequence plus content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub sequence: u64,
    pub digest: String,
}

impl VersionKey {
    /// Version for `content` written on top of `based_on`.
    pub fn derive(based_on: Option<&VersionKey>, content: &[u8]) -> Self {
        let sequence = based_on.map(|v| v.sequence + 1).unwrap_or(0);
        let mut hasher = Sha256::new();
        hasher.update(sequence.to_be_bytes());
        hasher.update(content);
        let digest = hex::encode(&hasher.finalize()[..10]);
        Self { sequence, digest }
    }
}

impl std::fmt::Display for VersionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}:{}", self.sequence, self.digest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub content: Vec<u8>,
    pub version: VersionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Version fork at {key}: based on {based_on:?}, current is {current:?}")]
    VersionFork {
        key: String,
        based_on: Option<VersionKey>,
        current: Option<VersionKey>,
    },

    #[error("Content protection rejected the request at {0}")]
    ProtectionRejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// DHT façade consumed by the process steps.
#[async_trait]
pub trait DataManager: Send + Sync {
    /// Fetch the current content and version, `None` if nothing is stored.
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredContent>, StoreError>;

    /// Store `content` on top of `based_on` (`None` for a first write).
    async fn put(
        &self,
        key: &StoreKey,
        content: Vec<u8>,
        based_on: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<VersionKey, StoreError>;

    /// Remove an item. `version` pins the removal to a known version when given.
    async fn remove(
        &self,
        key: &StoreKey,
        version: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<(), StoreError>;

    /// Item with the smallest content key in the (location, domain) pair.
    async fn get_oldest(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Option<(ContentKey, StoredContent)>, StoreError>;

    /// All content keys in the (location, domain) pair, ascending.
    async fn list_content_keys(&self, location: &str, domain: &str)
        -> Result<Vec<ContentKey>, StoreError>;
}
