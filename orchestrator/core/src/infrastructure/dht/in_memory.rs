// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory versioned store.
//!
//! Stands in for the DHT on development nodes and in tests. Enforces the same
//! contract as the network store:
//!
//! - a put must name the current version in `based_on` (`None` only for a
//!   key that does not exist yet), otherwise it is a version fork;
//! - the first put of a key registers the public half of its key pair as the
//!   key's protection; later puts and removes must be signed by that key.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::crypto::{CryptoProvider, KeyPair, PublicKey, Signature};
use crate::domain::store::{
    ContentKey, DataManager, StoreError, StoreKey, StoredContent, VersionKey,
};

#[derive(Clone)]
struct Entry {
    content: Vec<u8>,
    version: VersionKey,
    protection: PublicKey,
    signature: Signature,
}

#[derive(Clone)]
pub struct InMemoryDataManager {
    entries: Arc<RwLock<BTreeMap<StoreKey, Entry>>>,
    crypto: Arc<dyn CryptoProvider>,
}

impl InMemoryDataManager {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            crypto,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Public key registered as the protection of a stored key.
    pub fn protection_key(&self, key: &StoreKey) -> Option<PublicKey> {
        self.entries.read().get(key).map(|e| e.protection.clone())
    }

    /// Check the stored signature against the registered protection key.
    pub fn verify_entry(&self, key: &StoreKey) -> bool {
        self.entries
            .read()
            .get(key)
            .map(|e| self.crypto.verify(&e.protection, &e.content, &e.signature))
            .unwrap_or(false)
    }

    fn authorize(
        &self,
        key: &StoreKey,
        protection: &PublicKey,
        content: &[u8],
        keys: &KeyPair,
    ) -> Result<Signature, StoreError> {
        let signature = self
            .crypto
            .sign(keys, content)
            .map_err(|e| StoreError::ProtectionRejected(format!("{}: {}", key, e)))?;
        if !self.crypto.verify(protection, content, &signature) {
            return Err(StoreError::ProtectionRejected(key.to_string()));
        }
        Ok(signature)
    }

    fn range<'a>(
        entries: &'a BTreeMap<StoreKey, Entry>,
        location: &'a str,
        domain: &'a str,
    ) -> impl Iterator<Item = (&'a StoreKey, &'a Entry)> + 'a {
        let start = StoreKey::new(location, domain, ContentKey::new(""));
        entries
            .range(start..)
            .take_while(move |(k, _)| k.location == location && k.domain == domain)
    }
}

#[async_trait]
impl DataManager for InMemoryDataManager {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredContent>, StoreError> {
        Ok(self.entries.read().get(key).map(|e| StoredContent {
            content: e.content.clone(),
            version: e.version.clone(),
        }))
    }

    async fn put(
        &self,
        key: &StoreKey,
        content: Vec<u8>,
        based_on: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<VersionKey, StoreError> {
        let mut entries = self.entries.write();
        let current = entries.get(key);

        if current.map(|e| &e.version) != based_on {
            debug!(key = %key, based_on = ?based_on, "Put rejected as version fork");
            return Err(StoreError::VersionFork {
                key: key.to_string(),
                based_on: based_on.cloned(),
                current: current.map(|e| e.version.clone()),
            });
        }

        let registered = current
            .map(|e| e.protection.clone())
            .unwrap_or_else(|| protection.public.clone());
        let signature = self.authorize(key, &registered, &content, protection)?;

        let version = VersionKey::derive(based_on, &content);
        entries.insert(
            key.clone(),
            Entry {
                content,
                version: version.clone(),
                protection: registered,
                signature,
            },
        );
        debug!(key = %key, version = %version, "Content stored");
        Ok(version)
    }

    async fn remove(
        &self,
        key: &StoreKey,
        version: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let Some(current) = entries.get(key) else {
            return Ok(());
        };
        if let Some(version) = version {
            if version != &current.version {
                return Err(StoreError::VersionFork {
                    key: key.to_string(),
                    based_on: Some(version.clone()),
                    current: Some(current.version.clone()),
                });
            }
        }
        self.authorize(key, &current.protection, key.to_string().as_bytes(), protection)?;
        entries.remove(key);
        debug!(key = %key, "Content removed");
        Ok(())
    }

    async fn get_oldest(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Option<(ContentKey, StoredContent)>, StoreError> {
        let entries = self.entries.read();
        let oldest = Self::range(&entries, location, domain).next().map(|(k, e)| {
            (
                k.content.clone(),
                StoredContent {
                    content: e.content.clone(),
                    version: e.version.clone(),
                },
            )
        });
        Ok(oldest)
    }

    async fn list_content_keys(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Vec<ContentKey>, StoreError> {
        let entries = self.entries.read();
        let keys = Self::range(&entries, location, domain)
            .map(|(k, _)| k.content.clone())
            .collect();
        Ok(keys)
    }
}
