// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # User Profile Manager
//!
//! Owns the read-modify-write cycle of one user's profile on one node.
//!
//! ```text
//! get(profile) ──► modify copy ──► put(based_on = fetched version)
//!      ▲                                   │
//!      └──── backoff ◄── VERSION_FORK ◄────┘
//! ```
//!
//! A put that loses the race against another node (a version fork) redoes
//! the whole cycle against the newer profile, up to `max_fork_retries` times.
//! Within a node, cycles are serialized: overlapping callers queue in FIFO
//! order behind the one in flight.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::crypto::{KeyPair, PublicKey};
use crate::domain::events::ProfileEvent;
use crate::domain::node_config::UserProfileConfig;
use crate::domain::process::ProcessExecutionError;
use crate::domain::session::{SessionIdentity, UserId};
use crate::domain::store::{ContentKey, DataManager, StoreError, StoreKey, USER_PROFILE_DOMAIN};
use crate::domain::user_profile::{UserProfile, VersionedProfile};
use crate::infrastructure::event_bus::EventBus;

pub struct UserProfileManager {
    identity: SessionIdentity,
    store: Arc<dyn DataManager>,
    keys: RwLock<KeyPair>,
    config: UserProfileConfig,
    /// One modification cycle in flight; tokio's mutex queues waiters fairly.
    in_flight: tokio::sync::Mutex<()>,
    event_bus: Option<EventBus>,
}

impl UserProfileManager {
    pub fn new(
        identity: SessionIdentity,
        store: Arc<dyn DataManager>,
        keys: KeyPair,
        config: UserProfileConfig,
    ) -> Self {
        Self {
            identity,
            store,
            keys: RwLock::new(keys),
            config,
            in_flight: tokio::sync::Mutex::new(()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    pub fn config(&self) -> &UserProfileConfig {
        &self.config
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.read().public.clone()
    }

    /// Adopt a key pair the stored profile is already protected with.
    ///
    /// This only swaps the keys held by this manager; it never re-protects
    /// the stored profile. Until the profile carries `keys.public`, every
    /// modification fails fast with a stale protection key error.
    pub fn replace_protection_keys(&self, keys: KeyPair) {
        info!(
            user_id = %self.identity.user_id,
            fingerprint = %keys.public.fingerprint(),
            "Profile protection keys replaced"
        );
        *self.keys.write() = keys;
    }

    pub fn profile_key(&self) -> StoreKey {
        StoreKey::new(
            self.identity.user_id.as_str(),
            USER_PROFILE_DOMAIN,
            ContentKey::new(self.identity.user_id.as_str()),
        )
    }

    fn publish(&self, event: ProfileEvent) {
        if let Some(event_bus) = &self.event_bus {
            event_bus.publish_profile_event(event);
        }
    }

    /// Store the initial profile of this user.
    pub async fn create_profile(
        &self,
        profile: UserProfile,
    ) -> Result<VersionedProfile, ProcessExecutionError> {
        let keys = self.keys.read().clone();
        if profile.protection_key != keys.public {
            return Err(ProcessExecutionError::failed(
                "Profile must be protected by the session's key pair",
            ));
        }
        let bytes = serde_json::to_vec(&profile)
            .map_err(|e| ProcessExecutionError::failed(format!("Failed to encode profile: {}", e)))?;

        match self.store.put(&self.profile_key(), bytes, None, &keys).await {
            Ok(version) => {
                info!(user_id = %self.identity.user_id, version = %version, "Profile created");
                Ok(VersionedProfile { profile, version })
            }
            Err(StoreError::VersionFork { .. }) => Err(ProcessExecutionError::version_fork(format!(
                "Profile of '{}' already exists",
                self.identity.user_id
            ))),
            Err(e) => Err(ProcessExecutionError::put_failed(format!(
                "Failed to store profile of '{}': {}",
                self.identity.user_id, e
            ))),
        }
    }

    /// Fetch the current profile together with its version.
    pub async fn get_profile(&self) -> Result<VersionedProfile, ProcessExecutionError> {
        self.fetch_profile().await?.ok_or_else(|| {
            ProcessExecutionError::get_failed(format!(
                "No profile stored for '{}'",
                self.identity.user_id
            ))
        })
    }

    /// Like [`get_profile`](Self::get_profile), but a missing profile is
    /// `Ok(None)` while an unreachable store stays an error.
    pub async fn fetch_profile(&self) -> Result<Option<VersionedProfile>, ProcessExecutionError> {
        let stored = self.store.get(&self.profile_key()).await.map_err(|e| {
            ProcessExecutionError::get_failed(format!(
                "Failed to fetch profile of '{}': {}",
                self.identity.user_id, e
            ))
        })?;
        let Some(stored) = stored else {
            return Ok(None);
        };

        let profile: UserProfile = serde_json::from_slice(&stored.content).map_err(|e| {
            ProcessExecutionError::failed(format!("Failed to decode profile: {}", e))
        })?;
        Ok(Some(VersionedProfile {
            profile,
            version: stored.version,
        }))
    }

    /// Apply `modifier` to the current profile and store the result.
    ///
    /// `modifier` may run several times, once per attempt, and must therefore
    /// be free of side effects outside the profile it returns.
    pub async fn modify_and_put<F>(
        &self,
        description: &str,
        modifier: F,
    ) -> Result<VersionedProfile, ProcessExecutionError>
    where
        F: Fn(UserProfile) -> Result<UserProfile, ProcessExecutionError> + Send + Sync,
    {
        let _in_flight = self.in_flight.lock().await;
        let key = self.profile_key();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(user_id = %self.identity.user_id, attempt, "{}: fetching profile", description);
            let current = self.get_profile().await?;
            let keys = self.keys.read().clone();

            if current.profile.protection_key != keys.public {
                warn!(
                    user_id = %self.identity.user_id,
                    registered = %current.profile.protection_key.fingerprint(),
                    held = %keys.public.fingerprint(),
                    "Profile is protected by another key"
                );
                return Err(ProcessExecutionError::failed(format!(
                    "{}: stale protection key for profile of '{}'",
                    description, self.identity.user_id
                )));
            }

            let modified = modifier(current.profile.clone())?;
            let bytes = serde_json::to_vec(&modified).map_err(|e| {
                ProcessExecutionError::failed(format!("Failed to encode profile: {}", e))
            })?;

            match self.store.put(&key, bytes, Some(&current.version), &keys).await {
                Ok(version) => {
                    metrics::counter!("peerhive_profile_put_total").increment(1);
                    info!(
                        user_id = %self.identity.user_id,
                        version = %version,
                        attempts = attempt,
                        "{}", description
                    );
                    self.publish(ProfileEvent::ProfileCommitted {
                        user_id: self.identity.user_id.clone(),
                        version: version.clone(),
                        attempts: attempt,
                        committed_at: Utc::now(),
                    });
                    return Ok(VersionedProfile {
                        profile: modified,
                        version,
                    });
                }
                Err(StoreError::VersionFork { current: newer, .. }) => {
                    self.publish(ProfileEvent::VersionForkDetected {
                        user_id: self.identity.user_id.clone(),
                        attempt,
                        detected_at: Utc::now(),
                    });
                    if attempt > self.config.max_fork_retries {
                        metrics::counter!("peerhive_profile_fork_exhausted_total").increment(1);
                        warn!(
                            user_id = %self.identity.user_id,
                            attempts = attempt,
                            "Giving up after repeated version forks"
                        );
                        return Err(ProcessExecutionError::version_fork(format!(
                            "{}: profile of '{}' kept changing concurrently ({} attempts)",
                            description, self.identity.user_id, attempt
                        )));
                    }

                    metrics::counter!("peerhive_profile_fork_retries_total").increment(1);
                    let backoff = self.config.backoff_for(attempt);
                    warn!(
                        user_id = %self.identity.user_id,
                        based_on = %current.version,
                        newer = ?newer,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Version fork on profile put, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(ProcessExecutionError::put_failed(format!(
                        "{}: failed to store profile of '{}': {}",
                        description, self.identity.user_id, e
                    )));
                }
            }
        }
    }
}
