// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the integration tests: node wiring and `DataManager`
//! wrappers that inject faults, concurrent writers and lock-step reads.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Barrier;

use peerhive_core::application::task_queue::UserProfileTaskQueue;
use peerhive_core::application::user_profile_manager::UserProfileManager;
use peerhive_core::domain::crypto::{CryptoProvider, KeyPair};
use peerhive_core::domain::node_config::{TaskQueueConfig, UserProfileConfig};
use peerhive_core::domain::session::{SessionIdentity, UserId};
use peerhive_core::domain::store::{
    ContentKey, DataManager, StoreError, StoreKey, StoredContent, VersionKey, USER_PROFILE_DOMAIN,
    USER_PROFILE_TASK_DOMAIN,
};
use peerhive_core::domain::user_profile::UserProfile;
use peerhive_core::infrastructure::crypto::Ed25519CryptoProvider;
use peerhive_core::infrastructure::dht::InMemoryDataManager;

pub fn crypto() -> Arc<dyn CryptoProvider> {
    Arc::new(Ed25519CryptoProvider::new())
}

pub fn memory_store() -> InMemoryDataManager {
    InMemoryDataManager::new(crypto())
}

/// Retry tuning that keeps fork-heavy tests fast.
pub fn fast_profile_config(max_fork_retries: u32) -> UserProfileConfig {
    UserProfileConfig {
        max_fork_retries,
        fork_backoff: Duration::from_millis(1),
        max_fork_backoff: Duration::from_millis(8),
        ..UserProfileConfig::default()
    }
}

/// One user's services on one node.
pub struct Node {
    pub keys: KeyPair,
    pub manager: Arc<UserProfileManager>,
    pub queue: Arc<UserProfileTaskQueue>,
}

impl Node {
    pub fn new(
        user: &str,
        keys: KeyPair,
        store: Arc<dyn DataManager>,
        profile: UserProfileConfig,
        tasks: TaskQueueConfig,
    ) -> Self {
        let manager = Arc::new(UserProfileManager::new(
            SessionIdentity::new(UserId::new(user), "127.0.0.1:4622"),
            store.clone(),
            keys.clone(),
            profile,
        ));
        let queue = Arc::new(UserProfileTaskQueue::new(
            manager.clone(),
            store,
            crypto(),
            tasks,
        ));
        Self {
            keys,
            manager,
            queue,
        }
    }

    /// Node with a freshly generated key pair whose profile is already stored.
    pub async fn registered(user: &str, store: Arc<dyn DataManager>) -> Self {
        let node = Self::new(
            user,
            crypto().generate_key_pair(),
            store,
            UserProfileConfig::default(),
            TaskQueueConfig::default(),
        );
        node.create_profile().await;
        node
    }

    pub async fn create_profile(&self) {
        self.manager
            .create_profile(UserProfile::new(
                self.manager.user_id().clone(),
                self.keys.public.clone(),
            ))
            .await
            .expect("profile creation");
    }

    pub async fn profile(&self) -> UserProfile {
        self.manager.get_profile().await.expect("profile fetch").profile
    }
}

pub fn profile_key(user: &str) -> StoreKey {
    StoreKey::new(user, USER_PROFILE_DOMAIN, ContentKey::new(user))
}

/// Fails selected operations and records the queue traffic it forwards.
pub struct FaultyStore {
    inner: InMemoryDataManager,
    failing_puts: Mutex<HashSet<String>>,
    failing_task_removes: AtomicU32,
    log: Mutex<Vec<String>>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryDataManager) -> Self {
        Self {
            inner,
            failing_puts: Mutex::new(HashSet::new()),
            failing_task_removes: AtomicU32::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Every put to an item with this content key fails as unavailable.
    pub fn fail_puts_to(&self, content: &str) {
        self.failing_puts.lock().insert(content.to_string());
    }

    /// The next `count` task removals fail as unavailable.
    pub fn fail_task_removes(&self, count: u32) {
        self.failing_task_removes.store(count, Ordering::SeqCst);
    }

    /// `oldest <key>` / `oldest none` / `remove <key>` entries of the task domain.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl DataManager for FaultyStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredContent>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &StoreKey,
        content: Vec<u8>,
        based_on: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<VersionKey, StoreError> {
        if self.failing_puts.lock().contains(key.content.as_str()) {
            return Err(StoreError::Unavailable(format!("injected put failure at {}", key)));
        }
        self.inner.put(key, content, based_on, protection).await
    }

    async fn remove(
        &self,
        key: &StoreKey,
        version: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<(), StoreError> {
        if key.domain == USER_PROFILE_TASK_DOMAIN {
            let injected = self
                .failing_task_removes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(StoreError::Unavailable(format!("injected remove failure at {}", key)));
            }
            self.log.lock().push(format!("remove {}", key.content));
        }
        self.inner.remove(key, version, protection).await
    }

    async fn get_oldest(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Option<(ContentKey, StoredContent)>, StoreError> {
        let oldest = self.inner.get_oldest(location, domain).await?;
        if domain == USER_PROFILE_TASK_DOMAIN {
            let entry = match &oldest {
                Some((key, _)) => format!("oldest {}", key),
                None => "oldest none".to_string(),
            };
            self.log.lock().push(entry);
        }
        Ok(oldest)
    }

    async fn list_content_keys(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Vec<ContentKey>, StoreError> {
        self.inner.list_content_keys(location, domain).await
    }
}

/// A store that cannot be reached: every read fails, and writes are counted
/// before they fail too.
#[derive(Default)]
pub struct OfflineStore {
    writes: AtomicUsize,
}

impl OfflineStore {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn unreachable(&self, at: impl std::fmt::Display) -> StoreError {
        StoreError::Unavailable(format!("no route to {}", at))
    }
}

#[async_trait]
impl DataManager for OfflineStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredContent>, StoreError> {
        Err(self.unreachable(key))
    }

    async fn put(
        &self,
        key: &StoreKey,
        _content: Vec<u8>,
        _based_on: Option<&VersionKey>,
        _protection: &KeyPair,
    ) -> Result<VersionKey, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(self.unreachable(key))
    }

    async fn remove(
        &self,
        key: &StoreKey,
        _version: Option<&VersionKey>,
        _protection: &KeyPair,
    ) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(self.unreachable(key))
    }

    async fn get_oldest(
        &self,
        location: &str,
        _domain: &str,
    ) -> Result<Option<(ContentKey, StoredContent)>, StoreError> {
        Err(self.unreachable(location))
    }

    async fn list_content_keys(
        &self,
        location: &str,
        _domain: &str,
    ) -> Result<Vec<ContentKey>, StoreError> {
        Err(self.unreachable(location))
    }
}

/// Lets a competing writer commit to a profile right before each of the next
/// `forks` profile puts, so those puts fork.
pub struct RivalWriter {
    inner: InMemoryDataManager,
    forks: AtomicU32,
    rival_commits: AtomicU32,
}

impl RivalWriter {
    pub fn new(inner: InMemoryDataManager, forks: u32) -> Self {
        Self {
            inner,
            forks: AtomicU32::new(forks),
            rival_commits: AtomicU32::new(0),
        }
    }

    pub fn rival_commits(&self) -> u32 {
        self.rival_commits.load(Ordering::SeqCst)
    }

    async fn commit_rival(&self, key: &StoreKey, protection: &KeyPair) -> Result<(), StoreError> {
        let Some(current) = self.inner.get(key).await? else {
            return Ok(());
        };
        let mut profile: UserProfile = serde_json::from_slice(&current.content)?;
        let n = self.rival_commits.fetch_add(1, Ordering::SeqCst) + 1;
        profile
            .add_folder(&format!("rival-{}", n))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let bytes = serde_json::to_vec(&profile)?;
        self.inner
            .put(key, bytes, Some(&current.version), protection)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DataManager for RivalWriter {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredContent>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &StoreKey,
        content: Vec<u8>,
        based_on: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<VersionKey, StoreError> {
        let rival = key.domain == USER_PROFILE_DOMAIN
            && based_on.is_some()
            && self
                .forks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if rival {
            self.commit_rival(key, protection).await?;
        }
        self.inner.put(key, content, based_on, protection).await
    }

    async fn remove(
        &self,
        key: &StoreKey,
        version: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<(), StoreError> {
        self.inner.remove(key, version, protection).await
    }

    async fn get_oldest(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Option<(ContentKey, StoredContent)>, StoreError> {
        self.inner.get_oldest(location, domain).await
    }

    async fn list_content_keys(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Vec<ContentKey>, StoreError> {
        self.inner.list_content_keys(location, domain).await
    }
}

/// Holds the first `parties` profile reads at a barrier so every reader
/// fetches the same version before anyone writes.
pub struct LockstepReads {
    inner: InMemoryDataManager,
    barrier: Barrier,
    remaining: AtomicUsize,
}

impl LockstepReads {
    pub fn new(inner: InMemoryDataManager, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            remaining: AtomicUsize::new(parties),
        }
    }
}

#[async_trait]
impl DataManager for LockstepReads {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredContent>, StoreError> {
        let read = self.inner.get(key).await?;
        let held = key.domain == USER_PROFILE_DOMAIN
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if held {
            self.barrier.wait().await;
        }
        Ok(read)
    }

    async fn put(
        &self,
        key: &StoreKey,
        content: Vec<u8>,
        based_on: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<VersionKey, StoreError> {
        self.inner.put(key, content, based_on, protection).await
    }

    async fn remove(
        &self,
        key: &StoreKey,
        version: Option<&VersionKey>,
        protection: &KeyPair,
    ) -> Result<(), StoreError> {
        self.inner.remove(key, version, protection).await
    }

    async fn get_oldest(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Option<(ContentKey, StoredContent)>, StoreError> {
        self.inner.get_oldest(location, domain).await
    }

    async fn list_content_keys(
        &self,
        location: &str,
        domain: &str,
    ) -> Result<Vec<ContentKey>, StoreError> {
        self.inner.list_content_keys(location, domain).await
    }
}
